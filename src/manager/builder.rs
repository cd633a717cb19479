//! 协议管理器构建器

use std::sync::Arc;

use dashmap::DashMap;

use super::ProtocolManager;
use crate::accessor::{
    AccessPolicy, BackgroundCompiler, PermissivePolicy, Specializer, StructureCache, StructureEnv,
};
use crate::config::ProtocolConfig;
use crate::dispatch::{AsyncWorkerPool, ListenerDispatcher};
use crate::channel::PrimaryThread;
use crate::error::Result;
use crate::metrics::ProtocolMetrics;
use crate::reflect::DefaultInstances;
use crate::registry::MessageRegistry;
use crate::report::{ErrorReporter, TracingErrorReporter};

/// 所有协作方都可替换，未设置时使用默认实现
#[derive(Default)]
pub struct ProtocolManagerBuilder {
    config: Option<ProtocolConfig>,
    registry: Option<Arc<MessageRegistry>>,
    reporter: Option<Arc<dyn ErrorReporter>>,
    policy: Option<Arc<dyn AccessPolicy>>,
    defaults: Option<Arc<DefaultInstances>>,
    specializer: Option<Arc<dyn Specializer>>,
    primary: Option<Arc<dyn PrimaryThread>>,
}

impl ProtocolManagerBuilder {
    pub fn config(mut self, config: ProtocolConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn registry(mut self, registry: Arc<MessageRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// 宿主访问控制策略
    pub fn access_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// 新建宿主对象时使用的默认实例工厂
    pub fn default_instances(mut self, defaults: Arc<DefaultInstances>) -> Self {
        self.defaults = Some(defaults);
        self
    }

    pub fn specializer(mut self, specializer: Arc<dyn Specializer>) -> Self {
        self.specializer = Some(specializer);
        self
    }

    pub fn primary_thread(mut self, primary: Arc<dyn PrimaryThread>) -> Self {
        self.primary = Some(primary);
        self
    }

    pub fn build(self) -> Result<ProtocolManager> {
        let config = self.config.unwrap_or_default();
        let metrics = Arc::new(ProtocolMetrics::new()?);
        let reporter = self
            .reporter
            .unwrap_or_else(|| Arc::new(TracingErrorReporter));

        let compiler = if config.specializer.enabled {
            let mut builder = BackgroundCompiler::builder(config.specializer.clone())
                .reporter(Arc::clone(&reporter))
                .metrics(Arc::clone(&metrics));
            if let Some(specializer) = self.specializer {
                builder = builder.specializer(specializer);
            }
            Some(builder.start()?)
        } else {
            None
        };

        let structures = Arc::new(StructureCache::with_env(StructureEnv {
            policy: self.policy.unwrap_or_else(|| Arc::new(PermissivePolicy)),
            defaults: self
                .defaults
                .unwrap_or_else(|| Arc::new(DefaultInstances::new())),
            compiler: compiler.clone(),
        }));

        let pool = if config.dispatch.async_workers > 0 {
            Some(Arc::new(AsyncWorkerPool::new(
                config.dispatch.async_workers,
                &config.dispatch.async_thread_name,
            )?))
        } else {
            None
        };

        let mut dispatcher = ListenerDispatcher::new(Arc::clone(&reporter), Arc::clone(&metrics))
            .with_timing(config.dispatch.timing);
        if let Some(pool) = &pool {
            dispatcher = dispatcher.with_pool(Arc::clone(pool));
        }

        Ok(ProtocolManager {
            registry: self.registry.unwrap_or_default(),
            structures,
            dispatcher: Arc::new(dispatcher),
            compiler,
            pool,
            reporter,
            metrics,
            primary: self.primary,
            injectors: DashMap::new(),
            closed: Default::default(),
            config,
        })
    }
}
