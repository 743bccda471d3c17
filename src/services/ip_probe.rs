//! 出口 IP 探测服务 - 业务能力层
//!
//! 切换线路成功后查询一次公网出口 IP，确认网络身份确实发生了变化。
//! 探测失败只记日志，不影响主流程。

use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://ifconfig.me/ip";
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// 出口 IP 探测器
pub struct IpProbe {
    client: Client,
    endpoint: String,
}

impl IpProbe {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .context("无法创建 HTTP 客户端")?;
        Ok(Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        })
    }

    /// 使用自定义探测端点创建
    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self> {
        let mut probe = Self::new()?;
        probe.endpoint = endpoint.into();
        Ok(probe)
    }

    /// 查询当前公网出口 IP
    pub async fn current_ip(&self) -> Result<String> {
        let ip = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .with_context(|| format!("出口 IP 探测请求失败: {}", self.endpoint))?
            .text()
            .await
            .context("出口 IP 探测响应读取失败")?;
        Ok(ip.trim().to_string())
    }
}
