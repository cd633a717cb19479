//! # Prometheus 指标收集模块
//!
//! 为拦截与分发路径提供统一的 Prometheus 指标。每个协议管理器持有独立的
//! [`Registry`]，同一进程中的多个管理器互不干扰。

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::error::Result;

/// 协议拦截指标
#[derive(Clone)]
pub struct ProtocolMetrics {
    registry: Registry,
    /// 经过监听器分发的消息数
    pub intercepted_total: IntCounterVec,
    /// 被取消的消息数
    pub cancelled_total: IntCounterVec,
    /// 延迟放行超时而被丢弃的消息数
    pub expired_total: IntCounterVec,
    /// 监听器故障次数
    pub listener_faults_total: IntCounterVec,
    /// 监听器耗时（秒），仅在计时模式下记录
    pub listener_duration_seconds: HistogramVec,
    /// 结构特化结果
    pub specializations_total: IntCounterVec,
    /// 当前已注入的通道数
    pub injected_channels: IntGauge,
}

impl ProtocolMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let intercepted_total = IntCounterVec::new(
            Opts::new(
                "packet_hook_intercepted_total",
                "Total number of messages offered to listeners",
            ),
            &["direction"],
        )?;

        let cancelled_total = IntCounterVec::new(
            Opts::new(
                "packet_hook_cancelled_total",
                "Total number of messages cancelled by listeners",
            ),
            &["direction"],
        )?;

        let expired_total = IntCounterVec::new(
            Opts::new(
                "packet_hook_expired_total",
                "Total number of delayed messages dropped after the processing timeout",
            ),
            &["direction"],
        )?;

        let listener_faults_total = IntCounterVec::new(
            Opts::new(
                "packet_hook_listener_faults_total",
                "Total number of isolated listener faults",
            ),
            &["owner"],
        )?;

        let listener_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "packet_hook_listener_duration_seconds",
                "Listener execution duration in seconds",
            )
            .buckets(vec![0.00001, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]),
            &["owner"],
        )?;

        let specializations_total = IntCounterVec::new(
            Opts::new(
                "packet_hook_specializations_total",
                "Structure specialization outcomes",
            ),
            &["outcome"],
        )?;

        let injected_channels = IntGauge::new(
            "packet_hook_injected_channels",
            "Number of channels currently injected",
        )?;

        registry.register(Box::new(intercepted_total.clone()))?;
        registry.register(Box::new(cancelled_total.clone()))?;
        registry.register(Box::new(expired_total.clone()))?;
        registry.register(Box::new(listener_faults_total.clone()))?;
        registry.register(Box::new(listener_duration_seconds.clone()))?;
        registry.register(Box::new(specializations_total.clone()))?;
        registry.register(Box::new(injected_channels.clone()))?;

        Ok(Self {
            registry,
            intercepted_total,
            cancelled_total,
            expired_total,
            listener_faults_total,
            listener_duration_seconds,
            specializations_total,
            injected_channels,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// 以 Prometheus 文本格式导出
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
