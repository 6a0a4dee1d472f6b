use store::Transaction;
use tracing::warn;

use crate::error::Result;

/// Commits `tx` if `result` is Ok, otherwise rolls it back and returns the
/// original error.
pub(crate) async fn finish<T: Transaction, R>(tx: T, result: Result<R>) -> Result<R> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "transaction rollback failed");
            }
            Err(err)
        }
    }
}
