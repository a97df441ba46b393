pub mod error;
pub mod repository;
pub mod resolver;
pub mod service;
pub mod state;
pub mod types;
pub mod worker;

pub use error::TransferError;
pub use repository::TransferRepo;
pub use resolver::{PgReceiverDirectory, ReceiverDirectory};
pub use service::{Caller, TransferService};
pub use state::{ExternalStatus, InternalKind, InternalStatus};
pub use types::{
    ExternalTransferRecord, ExternalTransferRequest, HistoryEntry, InternalTransferRecord,
    InternalTransferRequest, ReceiverRef, TransferId, TransferRecord, TransferSummary,
};
pub use worker::ReconciliationWorker;
