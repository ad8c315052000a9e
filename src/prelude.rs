//! Convenient imports for mvstm.
//!
//! Re-exports the working set so most callers need a single import:
//!
//! ```
//! use mvstm::prelude::*;
//!
//! let stm = Stm::new();
//! let cell = stm.atomically(|tx| TxRef::attach(tx, 7u64))?;
//! assert_eq!(stm.atomically(|tx| cell.get(tx))?, 7);
//! # Ok::<(), mvstm::Error>(())
//! ```

// Main entry points
pub use crate::{retry, Stm, TxRef};

// Error handling
pub use mvstm_core::{Result, StmError};

// Core vocabulary
pub use mvstm_core::{DirtinessPolicy, Handle, Transactable};

// Transaction layer
pub use mvstm_txn::{Transaction, TransactionStatus};
