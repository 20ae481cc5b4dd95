//! Atomic transaction sessions
//!
//! An atomic session asks the service to buffer a sequence of transaction
//! intents and compose them into a single on-chain transaction:
//!
//! ```text
//! Idle --start--> Active(id) --submit--> Active(id)
//! Active(id) --commit--> Committing(id) --> Idle   (composed tx or error)
//! Active(id) --rollback--> RollingBack(id) --> Idle
//! ```
//!
//! [`AtomicSession::start`] returns a [`BatchHandle`]; every call that belongs
//! to the batch takes the handle and carries its context as query parameters on
//! that request only. The transport itself holds no batch state.
//!
//! Only one batch is active per session. Starting a new batch while one is
//! active replaces it (logged at `warn`); the replaced handle is rejected from
//! then on. Commit and rollback consume the handle, and the session returns to
//! `Idle` whatever the outcome of the round trip, so a failed commit cannot be
//! retried with the same batch id.

use crate::error::{Error, Result};
use crate::rpc::RpcTransport;
use alloy::primitives::Address;
use alloy::rpc::types::TransactionRequest;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Service method that composes (or discards) the buffered batch
const COMMIT_METHOD: &str = "eulith_commit";

/// Lifecycle state of an [`AtomicSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicState {
    /// No batch in progress; transactions execute individually
    Idle,
    /// Calls tagged with this batch id are buffered by the service
    Active(Uuid),
    /// Commit round trip in flight
    Committing(Uuid),
    /// Rollback round trip in flight
    RollingBack(Uuid),
}

impl AtomicState {
    /// Batch id, if a batch exists in any phase
    pub const fn batch_id(&self) -> Option<Uuid> {
        match self {
            Self::Idle => None,
            Self::Active(id) | Self::Committing(id) | Self::RollingBack(id) => Some(*id),
        }
    }
}

impl fmt::Display for AtomicState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Active(id) => write!(f, "active({id})"),
            Self::Committing(id) => write!(f, "committing({id})"),
            Self::RollingBack(id) => write!(f, "rolling back({id})"),
        }
    }
}

/// Context of one atomic batch
///
/// Returned by [`AtomicSession::start`] and consumed by commit or rollback.
#[derive(Debug, PartialEq, Eq)]
pub struct BatchHandle {
    id: Uuid,
    account: Address,
    on_behalf_of: Option<Address>,
}

impl BatchHandle {
    fn new(account: Address, on_behalf_of: Option<Address>) -> Self {
        Self { id: Uuid::new_v4(), account, on_behalf_of }
    }

    /// Batch identifier sent as `atomic_tx_id`
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Account authorizing the batch
    pub const fn account(&self) -> Address {
        self.account
    }

    /// Safe the batch executes for, if any
    pub const fn on_behalf_of(&self) -> Option<Address> {
        self.on_behalf_of
    }

    /// Query parameters attached to every request in this batch
    pub fn annotations(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("auth_address", self.account.to_checksum(None)),
            ("atomic_tx_id", self.id.to_string()),
        ];
        if let Some(safe) = self.on_behalf_of {
            params.push(("gnosis_address", safe.to_checksum(None)));
        }
        params
    }
}

/// Transition bookkeeping for an atomic session
///
/// Holds no I/O; [`AtomicSession`] drives it around its round trips.
#[derive(Debug)]
pub struct BatchState {
    state: Mutex<AtomicState>,
}

impl Default for BatchState {
    fn default() -> Self {
        Self { state: Mutex::new(AtomicState::Idle) }
    }
}

impl BatchState {
    /// Current state
    pub fn get(&self) -> AtomicState {
        *self.lock()
    }

    /// Begin a new batch, replacing any active one
    pub fn begin(&self, account: Address, on_behalf_of: Option<Address>) -> Result<BatchHandle> {
        let mut state = self.lock();
        let handle = BatchHandle::new(account, on_behalf_of);

        match *state {
            AtomicState::Idle => {}
            AtomicState::Active(previous) => {
                warn!(%previous, replacement = %handle.id, "starting a batch while another is active; the previous batch is abandoned");
            }
            busy @ (AtomicState::Committing(_) | AtomicState::RollingBack(_)) => {
                return Err(Error::InvalidState(format!("cannot start a batch while {busy}")));
            }
        }

        *state = AtomicState::Active(handle.id);
        Ok(handle)
    }

    /// Ensure `handle` is the active batch
    pub fn check_active(&self, handle: &BatchHandle) -> Result<()> {
        let state = self.lock();
        match *state {
            AtomicState::Active(id) if id == handle.id => Ok(()),
            other => Err(Error::InvalidState(format!(
                "batch {} is not active (session is {other})",
                handle.id
            ))),
        }
    }

    /// Move the active batch into a transient phase
    ///
    /// The returned guard puts the session back to `Idle` when dropped.
    pub fn enter<'a>(
        &'a self,
        handle: &BatchHandle,
        phase: fn(Uuid) -> AtomicState,
    ) -> Result<IdleOnDrop<'a>> {
        let mut state = self.lock();
        match *state {
            AtomicState::Active(id) if id == handle.id => {
                *state = phase(id);
                Ok(IdleOnDrop { state: self, id })
            }
            other => Err(Error::InvalidState(format!(
                "batch {} cannot be finished (session is {other})",
                handle.id
            ))),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AtomicState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Returns the session to `Idle` once a commit or rollback round trip ends,
/// including when the future driving it is dropped
#[derive(Debug)]
pub struct IdleOnDrop<'a> {
    state: &'a BatchState,
    id: Uuid,
}

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if state.batch_id() == Some(self.id) {
            *state = AtomicState::Idle;
        }
    }
}

/// Client-side coordinator for atomic batches on one session
#[derive(Debug)]
pub struct AtomicSession {
    rpc: Arc<RpcTransport>,
    state: BatchState,
}

impl AtomicSession {
    /// Create an idle session on a transport
    pub fn new(rpc: Arc<RpcTransport>) -> Self {
        Self { rpc, state: BatchState::default() }
    }

    /// Current state
    pub fn state(&self) -> AtomicState {
        self.state.get()
    }

    /// Whether a batch is active
    pub fn is_active(&self) -> bool {
        matches!(self.state(), AtomicState::Active(_))
    }

    /// Id of the active batch, if any
    pub fn current_batch(&self) -> Option<Uuid> {
        match self.state() {
            AtomicState::Active(id) => Some(id),
            _ => None,
        }
    }

    /// Start a batch for `account`, optionally executing on behalf of a Safe
    pub fn start(&self, account: Address, on_behalf_of: Option<Address>) -> Result<BatchHandle> {
        let handle = self.state.begin(account, on_behalf_of)?;
        info!(batch = %handle.id, %account, "started atomic transaction");
        Ok(handle)
    }

    /// Forward a transaction into the batch
    ///
    /// The service buffers it; nothing executes until commit. The call is not
    /// signed locally, validated, reordered or deduplicated.
    #[instrument(skip_all, fields(batch = %handle.id))]
    pub async fn submit(&self, handle: &BatchHandle, tx: TransactionRequest) -> Result<()> {
        self.state.check_active(handle)?;
        let _: serde_json::Value = self
            .rpc
            .request_annotated("eth_sendTransaction", (tx,), &handle.annotations())
            .await?;
        Ok(())
    }

    /// Issue a service call that belongs to the batch
    pub async fn call<P, R>(&self, handle: &BatchHandle, method: &str, params: P) -> Result<R>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        self.state.check_active(handle)?;
        self.rpc.request_annotated(method, params, &handle.annotations()).await
    }

    /// Close the batch and return the composed, unsigned transaction
    ///
    /// A structured service error (e.g. a policy rejection) is returned as
    /// [`Error::Rpc`] unchanged. Either way the session is `Idle` afterwards.
    #[instrument(skip_all, fields(batch = %handle.id))]
    pub async fn commit(&self, handle: BatchHandle) -> Result<TransactionRequest> {
        let _idle = self.state.enter(&handle, AtomicState::Committing)?;
        let result = self.finish_round_trip::<TransactionRequest>(&handle).await;
        match &result {
            Ok(_) => info!("committed atomic transaction"),
            Err(err) => warn!(%err, "atomic transaction commit failed"),
        }
        result
    }

    /// Discard the batch
    ///
    /// The service has no separate rollback; the batch is committed and the
    /// composed transaction is dropped unsent.
    #[instrument(skip_all, fields(batch = %handle.id))]
    pub async fn rollback(&self, handle: BatchHandle) -> Result<()> {
        let _idle = self.state.enter(&handle, AtomicState::RollingBack)?;
        // Only the outcome matters; empty batches come back as `null` or `"0x"`.
        let _: IgnoredAny = self.finish_round_trip(&handle).await?;
        info!("rolled back atomic transaction");
        Ok(())
    }

    async fn finish_round_trip<R: DeserializeOwned>(&self, handle: &BatchHandle) -> Result<R> {
        self.rpc
            .request_annotated(COMMIT_METHOD, serde_json::Map::new(), &handle.annotations())
            .await
    }
}
