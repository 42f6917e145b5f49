pub mod purpose;
pub mod transaction;

pub use purpose::{InvalidPurpose, TransactionPurpose};
pub use transaction::{CreateTransactionOptions, Transaction, TransactionLine};
