//! The seam between the quickstart workflow and a secure-computation cluster.

use std::path::Path;
use uuid::Uuid;

use crate::{
    error::Result,
    keys::{
        PartyId,
        UserId,
    },
    operation::Operation,
    payments::{
        PaymentReceipt,
        Quote,
    },
    program::ProgramBindings,
    values::{
        NadaValues,
        Permissions,
    },
};

pub type ActionId = Uuid;
pub type StoreId = Uuid;
pub type ComputeId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeResult {
    // program outputs by name
    pub value: NadaValues,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputeEvent {
    // accepted by the cluster, waiting to be scheduled
    Queued {
        compute_id: ComputeId,
    },

    Progress {
        compute_id: ComputeId,
        message: String,
    },

    Finished {
        compute_id: ComputeId,
        result: ComputeResult,
    },
}

impl ComputeEvent {
    pub fn compute_id(&self) -> ComputeId {
        match self {
            ComputeEvent::Queued { compute_id }
            | ComputeEvent::Progress { compute_id, .. }
            | ComputeEvent::Finished { compute_id, .. } => *compute_id,
        }
    }
}

/// A user's connection to a cluster.
///
/// Every storing or computing call consumes a [`PaymentReceipt`] obtained for
/// the same [`Operation`]; the cluster rejects receipts quoted for anything
/// else and receipts that were already redeemed.
#[async_trait::async_trait]
pub trait NillionClient: Send + Sync {
    fn user_id(&self) -> UserId;

    fn party_id(&self) -> PartyId;

    /// Price an operation; the quote has to be paid before it can be redeemed.
    async fn request_quote(
        &self,
        cluster_id: &str,
        operation: &Operation,
    ) -> Result<Quote>;

    async fn store_program(
        &self,
        cluster_id: &str,
        program_name: &str,
        program_path: &Path,
        receipt: PaymentReceipt,
    ) -> Result<ActionId>;

    async fn store_values(
        &self,
        cluster_id: &str,
        values: &NadaValues,
        permissions: &Permissions,
        receipt: PaymentReceipt,
    ) -> Result<StoreId>;

    /// Dispatch a computation; its outcome arrives through [`Self::next_compute_event`].
    async fn compute(
        &self,
        cluster_id: &str,
        bindings: &ProgramBindings,
        store_ids: &[StoreId],
        values: &NadaValues,
        receipt: PaymentReceipt,
    ) -> Result<ComputeId>;

    /// Next event of this client's computations; `None` once the stream is closed.
    async fn next_compute_event(&self) -> Option<ComputeEvent>;
}
