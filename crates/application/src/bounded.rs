use std::future::Future;
use std::time::Duration;

use crate::error::ApplicationError;

/// 以固定时间预算执行一次存储调用，超时视为 `ApplicationError::Timeout`
pub async fn bounded<T, E, F>(
    operation: &'static str,
    budget: Duration,
    call: F,
) -> Result<T, ApplicationError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<ApplicationError>,
{
    match tokio::time::timeout(budget, call).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(ApplicationError::Timeout { operation }),
    }
}
