//! 上游调用重试
//!
//! 只读且幂等的上游调用在暂时性故障时最多重试一次；写操作（尤其是创建账号）从不重试。

use std::future::Future;
use std::time::Duration;

use domain::{IdentityError, RepositoryError};
use tokio::time::sleep;

const READ_RETRY_DELAY: Duration = Duration::from_millis(25);

/// 可判断是否为暂时性故障的错误
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for RepositoryError {
    fn is_transient(&self) -> bool {
        RepositoryError::is_transient(self)
    }
}

impl Transient for IdentityError {
    fn is_transient(&self) -> bool {
        IdentityError::is_transient(self)
    }
}

pub async fn retry_read_once<F, Fut, T, E>(operation: &'static str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + std::fmt::Display,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(err) if err.is_transient() => {
            tracing::warn!(operation, error = %err, "upstream read failed, retrying once");
            sleep(READ_RETRY_DELAY).await;
            op().await
        }
        Err(err) => Err(err),
    }
}
