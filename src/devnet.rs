//! An in-process stand-in for a cluster and its payments chain.
//!
//! [`LocalDevnet`] keeps the ledger, the stored programs and the stored values
//! in memory and enforces the same contracts as a real cluster: quotes must be
//! paid before they are redeemed, a receipt is redeemed at most once and only
//! for the operation it was quoted for, and computing over stored values
//! requires a compute permission for the program. Values are kept in the
//! clear; nothing here is secret-shared.

use std::{
    collections::HashMap,
    path::Path,
    sync::Arc,
};
use chrono::{
    DateTime, Duration, Utc
};
use k256::ecdsa::{
    signature::Verifier,
    VerifyingKey,
};
use log::{
    debug, info, warn
};
use sha2::{
    Digest, Sha256
};
use tokio::sync::{
    mpsc::{
        self,
        UnboundedReceiver,
        UnboundedSender,
    },
    Mutex,
};
use uuid::Uuid;

use crate::{
    client::{
        ActionId,
        ComputeEvent,
        ComputeId,
        ComputeResult,
        NillionClient,
        StoreId,
    },
    error::{
        Error,
        Result,
    },
    keys::{
        NodeKey,
        PartyId,
        UserId,
        UserKey,
    },
    operation::Operation,
    payments::{
        PaymentReceipt,
        PaymentsClient,
        Quote,
        TxHash,
        Wallet,
    },
    program::{
        Program,
        ProgramBindings,
        ProgramId,
    },
    values::{
        NadaValues,
        Permissions,
    },
};

// how long a quote stays payable and redeemable
const DEFAULT_QUOTE_TTL_SECS: i64 = 300;

/// Operation prices in `unil`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceTable {
    pub store_program: u64,
    // per value, per day of retention
    pub store_value_day: u64,
    pub compute: u64,
    // per value supplied at compute time
    pub compute_value: u64,
}

impl Default for PriceTable {
    fn default() -> Self {
        Self {
            store_program: 1_000,
            store_value_day: 20,
            compute: 500,
            compute_value: 50,
        }
    }
}

impl PriceTable {
    pub fn cost(&self, operation: &Operation) -> u64 {
        match operation {
            Operation::StoreProgram { .. } => self.store_program,
            Operation::StoreValues { value_names, ttl_days } => self.store_value_day
                .saturating_mul(value_names.len() as u64)
                .saturating_mul(u64::from(*ttl_days)),
            Operation::Compute { value_names, .. } => self.compute
                .saturating_add(self.compute_value.saturating_mul(value_names.len() as u64)),
        }
    }
}

#[derive(Debug)]
struct QuoteRecord {
    quote: Quote,
    operation: Operation,
    // set once paid
    payment: Option<Payment>,
    redeemed: bool,
}

#[derive(Debug)]
struct Payment {
    tx_hash: TxHash,
    payer: String,
    payer_key: VerifyingKey,
}

#[derive(Debug)]
struct StoredValues {
    values: NadaValues,
    permissions: Permissions,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    // <address, balance in unil>
    balances: HashMap<String, u64>,
    quotes: HashMap<Uuid, QuoteRecord>,
    programs: HashMap<ProgramId, Program>,
    values: HashMap<StoreId, StoredValues>,
}

impl State {
    // the operation a receipt was quoted for
    fn quoted_operation(&self, receipt: &PaymentReceipt) -> Result<&Operation> {
        self.quotes
            .get(&receipt.quote.id)
            .map(|record| &record.operation)
            .ok_or_else(|| Error::ReceiptRejected(format!("unknown quote `{}`", receipt.quote.id)))
    }

    // all the checks that make a receipt redeemable for `operation`; nothing is changed
    fn check_receipt(&self, operation: &Operation, receipt: &PaymentReceipt) -> Result<()> {
        let reject = |msg: String| Err(Error::ReceiptRejected(format!("quote `{}`: {msg}", receipt.quote.id)));
        let record = match self.quotes.get(&receipt.quote.id) {
            Some(record) => record,
            None => return reject("unknown quote".to_string()),
        };
        if record.quote != receipt.quote {
            return reject("receipt does not carry the issued quote".to_string());
        }
        let payment = match &record.payment {
            Some(payment) => payment,
            None => return reject("quote was never paid".to_string()),
        };
        if payment.tx_hash != receipt.tx_hash || payment.payer != receipt.payer {
            return reject(format!("quote was not paid by transaction `{}`", receipt.tx_hash));
        }
        if record.redeemed {
            return reject("receipt was already used".to_string());
        }
        if record.quote.is_expired(Utc::now()) {
            return reject("quote has expired".to_string());
        }
        if record.operation.digest() != operation.digest() {
            return reject(format!("receipt was issued for {}, not for {operation}", record.operation));
        }
        if payment.payer_key.verify(&record.quote.digest(), &receipt.signature).is_err() {
            return reject("payer signature does not verify".to_string());
        }
        Ok(())
    }

    // drop quotes that can no longer be paid or redeemed
    fn prune_quotes(&mut self, now: DateTime<Utc>) {
        let before = self.quotes.len();
        self.quotes.retain(|_, record| !record.redeemed && !record.quote.is_expired(now));
        if self.quotes.len() < before {
            debug!("Pruned {} spent or expired quote(s)", before - self.quotes.len());
        }
    }

    fn redeem(&mut self, receipt: &PaymentReceipt) {
        if let Some(record) = self.quotes.get_mut(&receipt.quote.id) {
            record.redeemed = true;
        }
    }
}

struct Shared {
    cluster_id: String,
    prices: PriceTable,
    quote_ttl: Duration,
    state: Mutex<State>,
}

impl Shared {
    fn check_cluster(&self, cluster_id: &str) -> Result<()> {
        if cluster_id != self.cluster_id {
            return Err(Error::UnknownCluster(cluster_id.to_string()));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct LocalDevnet {
    shared: Arc<Shared>,
}

impl LocalDevnet {
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self::with_prices(cluster_id, PriceTable::default())
    }

    pub fn with_prices(cluster_id: impl Into<String>, prices: PriceTable) -> Self {
        Self::build(cluster_id.into(), prices, Duration::seconds(DEFAULT_QUOTE_TTL_SECS))
    }

    pub fn with_quote_ttl(cluster_id: impl Into<String>, quote_ttl: Duration) -> Self {
        Self::build(cluster_id.into(), PriceTable::default(), quote_ttl)
    }

    fn build(cluster_id: String, prices: PriceTable, quote_ttl: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                cluster_id,
                prices,
                quote_ttl,
                state: Mutex::new(State::default()),
            }),
        }
    }

    // credit an address, e.g. from a faucet
    pub async fn fund(&self, address: &str, amount_unil: u64) {
        let mut state = self.shared.state.lock().await;
        let balance = state.balances.entry(address.to_string()).or_insert(0);
        *balance = balance.saturating_add(amount_unil);
        info!("Funded `{address}` with {amount_unil}unil, balance is now {balance}unil");
    }

    pub async fn balance(&self, address: &str) -> u64 {
        self.shared.state
            .lock()
            .await
            .balances
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    /// Connect a user to this devnet through the node identified by `node_key`.
    pub fn client(&self, user_key: &UserKey, node_key: &NodeKey) -> LocalClient {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        LocalClient {
            shared: Arc::clone(&self.shared),
            user_id: user_key.user_id(),
            party_id: node_key.party_id(),
            events_tx,
            events_rx: Mutex::new(events_rx),
        }
    }
}

#[async_trait::async_trait]
impl PaymentsClient for LocalDevnet {
    async fn pay(
        &self,
        wallet: &Wallet,
        quote: &Quote,
    ) -> Result<TxHash> {
        let mut guard = self.shared.state.lock().await;
        let state = &mut *guard;
        let record = state.quotes
            .get_mut(&quote.id)
            .ok_or_else(|| Error::QuoteRejected(format!("unknown quote `{}`", quote.id)))?;
        if record.quote != *quote {
            return Err(Error::QuoteRejected(format!("quote `{}` does not match the issued quote", quote.id)));
        }
        if record.payment.is_some() {
            return Err(Error::QuoteRejected(format!("quote `{}` is already paid", quote.id)));
        }
        if quote.is_expired(Utc::now()) {
            return Err(Error::QuoteRejected(format!("quote `{}` has expired", quote.id)));
        }

        let address = wallet.address();
        let balance = state.balances.get(address).copied().unwrap_or(0);
        if balance < quote.cost_unil {
            return Err(Error::InsufficientFunds {
                address: address.to_string(),
                balance: balance,
                cost: quote.cost_unil,
            });
        }
        state.balances.insert(address.to_string(), balance - quote.cost_unil);

        let mut hasher = Sha256::new();
        hasher.update(quote.digest());
        hasher.update(address.as_bytes());
        hasher.update(rand::random::<u64>().to_be_bytes());
        let tx_hash = TxHash(hex::encode_upper(hasher.finalize()));

        record.payment = Some(Payment {
            tx_hash: tx_hash.clone(),
            payer: address.to_string(),
            payer_key: wallet.verifying_key().clone(),
        });
        debug!("`{address}` paid {}unil for quote `{}`", quote.cost_unil, quote.id);
        Ok(tx_hash)
    }
}

/// A user's connection to a [`LocalDevnet`].
pub struct LocalClient {
    shared: Arc<Shared>,
    user_id: UserId,
    party_id: PartyId,
    // kept so the event stream stays open for the lifetime of the client
    events_tx: UnboundedSender<ComputeEvent>,
    events_rx: Mutex<UnboundedReceiver<ComputeEvent>>,
}

impl LocalClient {
    // every party named by the program must be bound to this client's node,
    // the only node that provides inputs and receives outputs here
    fn check_bindings(&self, program: &Program, bindings: &ProgramBindings) -> Result<()> {
        let parties = program.inputs
            .iter()
            .map(|input| ("input", &input.name, &input.party, &bindings.input_parties))
            .chain(program.outputs
                .iter()
                .map(|output| ("output", &output.name, &output.party, &bindings.output_parties)));
        for (side, name, party, bound) in parties {
            match bound.get(party) {
                None => {
                    return Err(Error::Compute(format!(
                        "party `{party}` of {side} `{name}` is not bound"
                    )));
                },
                Some(party_id) if *party_id != self.party_id => {
                    return Err(Error::Compute(format!(
                        "party `{party}` of {side} `{name}` is bound to node `{party_id}`, not to `{}`",
                        self.party_id
                    )));
                },
                Some(_) => {},
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl NillionClient for LocalClient {
    fn user_id(&self) -> UserId {
        self.user_id
    }

    fn party_id(&self) -> PartyId {
        self.party_id
    }

    async fn request_quote(
        &self,
        cluster_id: &str,
        operation: &Operation,
    ) -> Result<Quote> {
        self.shared.check_cluster(cluster_id)?;
        let quote = Quote {
            id: Uuid::new_v4(),
            operation_digest: operation.digest(),
            cost_unil: self.shared.prices.cost(operation),
            expires_at: Utc::now() + self.shared.quote_ttl,
        };
        let mut state = self.shared.state.lock().await;
        state.prune_quotes(Utc::now());
        state.quotes
            .insert(quote.id, QuoteRecord {
                quote: quote.clone(),
                operation: operation.clone(),
                payment: None,
                redeemed: false,
            });
        Ok(quote)
    }

    async fn store_program(
        &self,
        cluster_id: &str,
        program_name: &str,
        program_path: &Path,
        receipt: PaymentReceipt,
    ) -> Result<ActionId> {
        self.shared.check_cluster(cluster_id)?;
        let mir = tokio::fs::read(program_path).await?;
        let program = Program::from_mir_bytes(&mir)?;
        let operation = Operation::store_program_bytes(program_name, &mir);

        let mut state = self.shared.state.lock().await;
        state.check_receipt(&operation, &receipt)?;
        let program_id = ProgramId::new(self.user_id, program_name);
        if state.programs.insert(program_id.clone(), program).is_some() {
            warn!("Program `{program_id}` has been replaced.");
        }
        state.redeem(&receipt);

        let action_id = Uuid::new_v4();
        info!("Stored program `{program_id}`, action `{action_id}`");
        Ok(action_id)
    }

    async fn store_values(
        &self,
        cluster_id: &str,
        values: &NadaValues,
        permissions: &Permissions,
        receipt: PaymentReceipt,
    ) -> Result<StoreId> {
        self.shared.check_cluster(cluster_id)?;
        if permissions.owner != self.user_id {
            return Err(Error::PermissionDenied(format!(
                "user `{}` cannot store values owned by `{}`",
                self.user_id, permissions.owner
            )));
        }

        let mut state = self.shared.state.lock().await;
        // retention is part of what was quoted, not of this call
        let ttl_days = match state.quoted_operation(&receipt)? {
            Operation::StoreValues { ttl_days, .. } => *ttl_days,
            other => {
                return Err(Error::ReceiptRejected(format!(
                    "receipt was issued for {other}, not for storing values"
                )));
            },
        };
        let operation = Operation::store_values(values, ttl_days);
        state.check_receipt(&operation, &receipt)?;

        let store_id = Uuid::new_v4();
        state.values.insert(store_id, StoredValues {
            values: values.clone(),
            permissions: permissions.clone(),
            expires_at: Utc::now() + Duration::days(i64::from(ttl_days)),
        });
        state.redeem(&receipt);
        info!("Stored {} value(s) as `{store_id}` for {ttl_days} day(s)", values.len());
        Ok(store_id)
    }

    async fn compute(
        &self,
        cluster_id: &str,
        bindings: &ProgramBindings,
        store_ids: &[StoreId],
        values: &NadaValues,
        receipt: PaymentReceipt,
    ) -> Result<ComputeId> {
        self.shared.check_cluster(cluster_id)?;
        let program_id = &bindings.program_id;
        let operation = Operation::compute(program_id, values);

        let mut state = self.shared.state.lock().await;
        state.check_receipt(&operation, &receipt)?;
        let program = state.programs
            .get(program_id)
            .ok_or_else(|| Error::ProgramNotFound(program_id.to_string()))?;
        self.check_bindings(program, bindings)?;

        let now = Utc::now();
        let mut inputs = values.clone();
        for store_id in store_ids {
            let stored = state.values
                .get(store_id)
                .filter(|stored| now < stored.expires_at)
                .ok_or_else(|| Error::ValuesNotFound(store_id.to_string()))?;
            if !stored.permissions.allows_compute(&self.user_id, program_id) {
                return Err(Error::PermissionDenied(format!(
                    "user `{}` may not compute `{program_id}` over `{store_id}`",
                    self.user_id
                )));
            }
            for (name, value) in stored.values.iter() {
                if inputs.insert(name, value.clone()).is_some() {
                    return Err(Error::Compute(format!("input `{name}` is supplied more than once")));
                }
            }
        }
        let outputs = program.evaluate(&inputs)?;
        state.redeem(&receipt);
        drop(state);

        let compute_id = Uuid::new_v4();
        info!("Computation `{compute_id}` of `{program_id}` accepted");
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let events = [
                ComputeEvent::Queued { compute_id },
                ComputeEvent::Progress {
                    compute_id,
                    message: "evaluating".to_string(),
                },
                ComputeEvent::Finished {
                    compute_id,
                    result: ComputeResult { value: outputs },
                },
            ];
            for event in events {
                if events_tx.send(event).is_err() {
                    // client is gone
                    return;
                }
                tokio::task::yield_now().await;
            }
        });
        Ok(compute_id)
    }

    async fn next_compute_event(&self) -> Option<ComputeEvent> {
        self.events_rx.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        payments::{
            get_quote_and_pay,
            NILLION_ADDRESS_PREFIX,
        },
        program::{
            mir_path,
            tests::DEMO_SOURCE,
        },
        values::NadaValue,
    };
    use std::path::PathBuf;
    use tempfile::TempDir;

    const CLUSTER_ID: &str = "9e68173f-9c23-4acc-ba81-4f079b639964";
    const PRIVATE_KEY: &str = "9a975f567428d054f2bf3092812e6c42f901ce07d9711bc77ee2cd81101f42c5";

    struct Fixture {
        devnet: LocalDevnet,
        client: LocalClient,
        wallet: Wallet,
        program_path: PathBuf,
        _dir: TempDir,
    }

    async fn fixture(devnet: LocalDevnet) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let program = Program::from_source(DEMO_SOURCE).unwrap();
        let program_path = mir_path(dir.path(), &program.name);
        std::fs::write(&program_path, program.to_mir_bytes().unwrap()).unwrap();

        let client = devnet.client(&UserKey::from_seed("my_seed"), &NodeKey::from_seed("my_seed"));
        let wallet = Wallet::from_hex(PRIVATE_KEY, NILLION_ADDRESS_PREFIX).unwrap();
        devnet.fund(wallet.address(), 1_000_000).await;
        Fixture {
            devnet,
            client,
            wallet,
            program_path,
            _dir: dir,
        }
    }

    fn copy_of(receipt: &PaymentReceipt) -> PaymentReceipt {
        PaymentReceipt {
            quote: receipt.quote.clone(),
            payer: receipt.payer.clone(),
            tx_hash: receipt.tx_hash.clone(),
            signature: receipt.signature.clone(),
        }
    }

    impl Fixture {
        async fn pay(&self, operation: &Operation) -> Result<PaymentReceipt> {
            get_quote_and_pay(&self.client, operation, &self.wallet, &self.devnet, CLUSTER_ID).await
        }

        async fn store_program(&self) -> ProgramId {
            let operation = Operation::store_program("my_telemetry_program", &self.program_path).unwrap();
            let receipt = self.pay(&operation).await.unwrap();
            self.client
                .store_program(CLUSTER_ID, "my_telemetry_program", &self.program_path, receipt)
                .await
                .unwrap();
            ProgramId::new(self.client.user_id(), "my_telemetry_program")
        }

        async fn store_secret(&self, permissions: &Permissions) -> Result<StoreId> {
            let secret = NadaValues::from([("secret_value", NadaValue::SecretInteger(42))]);
            let receipt = self.pay(&Operation::store_values(&secret, 5)).await?;
            self.client.store_values(CLUSTER_ID, &secret, permissions, receipt).await
        }

        fn bindings(&self, program_id: &ProgramId) -> ProgramBindings {
            let mut bindings = ProgramBindings::new(program_id.clone());
            bindings.add_input_party("Party1", self.client.party_id());
            bindings.add_output_party("Party1", self.client.party_id());
            bindings
        }

        fn permissions(&self, program_id: &ProgramId) -> Permissions {
            let mut permissions = Permissions::default_for_user(self.client.user_id());
            permissions.add_compute_permissions([(self.client.user_id(), [program_id.clone()])]);
            permissions
        }
    }

    fn compute_time_values() -> NadaValues {
        NadaValues::from([("operation_time", NadaValue::SecretInteger(10))])
    }

    #[tokio::test]
    async fn computation_reports_progress_then_result() {
        let f = fixture(LocalDevnet::new(CLUSTER_ID)).await;
        let program_id = f.store_program().await;
        let store_id = f.store_secret(&f.permissions(&program_id)).await.unwrap();

        let values = compute_time_values();
        let receipt = f.pay(&Operation::compute(&program_id, &values)).await.unwrap();
        let compute_id = f.client
            .compute(CLUSTER_ID, &f.bindings(&program_id), &[store_id], &values, receipt)
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = f.client.next_compute_event().await {
            let finished = matches!(event, ComputeEvent::Finished { .. });
            events.push(event);
            if finished {
                break;
            }
        }
        assert!(events.iter().all(|event| event.compute_id() == compute_id));
        assert!(matches!(events[0], ComputeEvent::Queued { .. }));
        match events.last().unwrap() {
            ComputeEvent::Finished { result, .. } => {
                assert_eq!(result.value.get("result"), Some(&NadaValue::SecretInteger(420)));
            },
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn payments_debit_the_wallet() {
        let f = fixture(LocalDevnet::new(CLUSTER_ID)).await;
        let before = f.devnet.balance(f.wallet.address()).await;
        f.store_program().await;
        assert_eq!(
            f.devnet.balance(f.wallet.address()).await,
            before - PriceTable::default().store_program
        );
    }

    #[tokio::test]
    async fn receipts_are_single_use() {
        let f = fixture(LocalDevnet::new(CLUSTER_ID)).await;
        let secret = NadaValues::from([("secret_value", NadaValue::SecretInteger(42))]);
        let permissions = Permissions::default_for_user(f.client.user_id());
        let receipt = f.pay(&Operation::store_values(&secret, 5)).await.unwrap();
        let replay = copy_of(&receipt);

        f.client.store_values(CLUSTER_ID, &secret, &permissions, receipt).await.unwrap();
        let err = f.client.store_values(CLUSTER_ID, &secret, &permissions, replay).await.unwrap_err();
        assert!(matches!(err, Error::ReceiptRejected(_)), "{err}");
    }

    #[tokio::test]
    async fn receipts_only_cover_their_operation() {
        let f = fixture(LocalDevnet::new(CLUSTER_ID)).await;
        let program_id = f.store_program().await;
        let store_id = f.store_secret(&f.permissions(&program_id)).await.unwrap();

        // paid for storing, presented for computing
        let values = compute_time_values();
        let receipt = f.pay(&Operation::store_values(&values, 5)).await.unwrap();
        let err = f.client
            .compute(CLUSTER_ID, &f.bindings(&program_id), &[store_id], &values, receipt)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReceiptRejected(_)), "{err}");

        // same kind of operation, different values
        let secret = NadaValues::from([("another_secret", NadaValue::SecretInteger(1))]);
        let receipt = f.pay(&Operation::store_values(&values, 5)).await.unwrap();
        let err = f.client
            .store_values(CLUSTER_ID, &secret, &Permissions::default_for_user(f.client.user_id()), receipt)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReceiptRejected(_)), "{err}");
    }

    #[tokio::test]
    async fn computing_requires_permission() {
        let f = fixture(LocalDevnet::new(CLUSTER_ID)).await;
        let program_id = f.store_program().await;
        let store_id = f.store_secret(&Permissions::default_for_user(f.client.user_id())).await.unwrap();

        let values = compute_time_values();
        let receipt = f.pay(&Operation::compute(&program_id, &values)).await.unwrap();
        let replay = copy_of(&receipt);
        let err = f.client
            .compute(CLUSTER_ID, &f.bindings(&program_id), &[store_id], &values, receipt)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)), "{err}");

        // a refused call leaves the receipt redeemable
        let permitted = f.store_secret(&f.permissions(&program_id)).await.unwrap();
        f.client
            .compute(CLUSTER_ID, &f.bindings(&program_id), &[permitted], &values, replay)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unbound_parties_are_refused() {
        let f = fixture(LocalDevnet::new(CLUSTER_ID)).await;
        let program_id = f.store_program().await;
        let store_id = f.store_secret(&f.permissions(&program_id)).await.unwrap();

        let values = compute_time_values();
        let receipt = f.pay(&Operation::compute(&program_id, &values)).await.unwrap();
        let mut bindings = ProgramBindings::new(program_id.clone());
        bindings.add_input_party("Party1", f.client.party_id());
        let err = f.client
            .compute(CLUSTER_ID, &bindings, &[store_id], &values, receipt)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Compute(_)), "{err}");
    }

    #[tokio::test]
    async fn parties_bound_to_another_node_are_refused() {
        let f = fixture(LocalDevnet::new(CLUSTER_ID)).await;
        let program_id = f.store_program().await;
        let store_id = f.store_secret(&f.permissions(&program_id)).await.unwrap();
        let stranger = NodeKey::from_seed("someone_else").party_id();

        let values = compute_time_values();
        let receipt = f.pay(&Operation::compute(&program_id, &values)).await.unwrap();
        let replay = copy_of(&receipt);

        let mut bindings = ProgramBindings::new(program_id.clone());
        bindings.add_input_party("Party1", stranger);
        bindings.add_output_party("Party1", f.client.party_id());
        let err = f.client
            .compute(CLUSTER_ID, &bindings, &[store_id], &values, receipt)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Compute(_)), "{err}");

        let mut bindings = ProgramBindings::new(program_id.clone());
        bindings.add_input_party("Party1", f.client.party_id());
        bindings.add_output_party("Party1", stranger);
        let err = f.client
            .compute(CLUSTER_ID, &bindings, &[store_id], &values, copy_of(&replay))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Compute(_)), "{err}");

        // nothing was redeemed by the refused calls
        f.client
            .compute(CLUSTER_ID, &f.bindings(&program_id), &[store_id], &values, replay)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn receipts_expire_with_their_quote() {
        let f = fixture(LocalDevnet::with_quote_ttl(CLUSTER_ID, Duration::milliseconds(500))).await;
        let operation = Operation::store_program("my_telemetry_program", &f.program_path).unwrap();
        let receipt = f.pay(&operation).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(700)).await;

        let err = f.client
            .store_program(CLUSTER_ID, "my_telemetry_program", &f.program_path, receipt)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReceiptRejected(_)), "{err}");
    }

    #[tokio::test]
    async fn spent_and_expired_quotes_are_pruned() {
        let f = fixture(LocalDevnet::with_quote_ttl(CLUSTER_ID, Duration::milliseconds(500))).await;
        let operation = Operation::store_program("my_telemetry_program", &f.program_path).unwrap();
        f.store_program().await;
        f.client.request_quote(CLUSTER_ID, &operation).await.unwrap();
        // the redeemed quote is gone, the fresh one is outstanding
        assert_eq!(f.devnet.shared.state.lock().await.quotes.len(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(700)).await;
        let fresh = f.client.request_quote(CLUSTER_ID, &operation).await.unwrap();
        let state = f.devnet.shared.state.lock().await;
        assert_eq!(state.quotes.len(), 1);
        assert!(state.quotes.contains_key(&fresh.id));
    }

    #[tokio::test]
    async fn unfunded_wallets_cannot_pay() {
        let f = fixture(LocalDevnet::new(CLUSTER_ID)).await;
        let poor = Wallet::from_hex(&"11".repeat(32), NILLION_ADDRESS_PREFIX).unwrap();
        let operation = Operation::store_program("my_telemetry_program", &f.program_path).unwrap();
        let err = get_quote_and_pay(&f.client, &operation, &poor, &f.devnet, CLUSTER_ID)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds { balance: 0, .. }), "{err}");
    }

    #[tokio::test]
    async fn expired_quotes_cannot_be_paid() {
        let f = fixture(LocalDevnet::with_quote_ttl(CLUSTER_ID, Duration::zero())).await;
        let operation = Operation::store_program("my_telemetry_program", &f.program_path).unwrap();
        let err = f.pay(&operation).await.unwrap_err();
        assert!(matches!(err, Error::QuoteRejected(_)), "{err}");
    }

    #[tokio::test]
    async fn unknown_clusters_are_refused() {
        let f = fixture(LocalDevnet::new(CLUSTER_ID)).await;
        let operation = Operation::store_program("my_telemetry_program", &f.program_path).unwrap();
        let err = f.client.request_quote("some-other-cluster", &operation).await.unwrap_err();
        assert!(matches!(err, Error::UnknownCluster(_)), "{err}");
    }
}
