use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use llgraph_result::{Error, Result};

/// Exclusive write ownership of one table.
///
/// The flag is cleared when the lease drops, whether the write committed or
/// was abandoned.
#[derive(Debug)]
pub(crate) struct WriterLease {
    flag: Arc<AtomicBool>,
}

impl WriterLease {
    pub(crate) fn acquire(flag: &Arc<AtomicBool>, table: &str) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| {
                Error::TransactionContextError(format!(
                    "Table '{table}' is already being written by another statement"
                ))
            })?;
        Ok(Self {
            flag: Arc::clone(flag),
        })
    }
}

impl Drop for WriterLease {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lease_conflicts_until_first_drops() {
        let flag = Arc::new(AtomicBool::new(false));
        let first = WriterLease::acquire(&flag, "t").unwrap();
        assert!(matches!(
            WriterLease::acquire(&flag, "t"),
            Err(Error::TransactionContextError(_))
        ));
        drop(first);
        assert!(WriterLease::acquire(&flag, "t").is_ok());
    }
}
