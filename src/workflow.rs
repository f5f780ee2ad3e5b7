//! The quickstart: store a program, store a secret, compute over both and
//! wait for the result.
//!
//! Steps run strictly in order and every storing or computing call is paid
//! for first. Nothing is retried and nothing is rolled back: a failing step
//! ends the run and leaves whatever was already stored in place.

use std::{
    path::PathBuf,
    time::Duration,
};
use log::{
    debug, info
};
use serde_json::json;

use crate::{
    client::{
        ComputeEvent,
        ComputeId,
        ComputeResult,
        NillionClient,
    },
    config::Config,
    error::{
        Error,
        Result,
    },
    keys::{
        NodeKey,
        UserKey,
    },
    operation::Operation,
    payments::{
        get_quote_and_pay,
        PaymentsClient,
        Wallet,
    },
    program::{
        mir_path,
        ProgramBindings,
        ProgramId,
    },
    telemetry::{
        self,
        properties,
        TelemetrySink,
    },
    values::{
        NadaValue,
        NadaValues,
        Permissions,
    },
};

pub const DEFAULT_SEED: &str = "my_seed";
pub const DEFAULT_PROGRAM_NAME: &str = "my_telemetry_program";
pub const DEFAULT_PROGRAM_DIR: &str = "../nada_quickstart_programs/target";

#[derive(Debug, Clone)]
pub struct QuickstartParams {
    pub seed: String,
    pub program_name: String,
    pub program_path: PathBuf,
    // stored in the network before computing
    pub secret_name: String,
    pub secret_value: i64,
    // supplied along with the compute call
    pub compute_secret_name: String,
    pub compute_secret_value: i64,
    pub party_name: String,
    pub ttl_days: u32,
    // `None` waits for the result indefinitely
    pub compute_timeout: Option<Duration>,
}

impl Default for QuickstartParams {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED.to_string(),
            program_name: DEFAULT_PROGRAM_NAME.to_string(),
            program_path: mir_path(DEFAULT_PROGRAM_DIR.as_ref(), DEFAULT_PROGRAM_NAME),
            secret_name: "secret_value".to_string(),
            secret_value: 42,
            compute_secret_name: "operation_time".to_string(),
            compute_secret_value: 10,
            party_name: "Party1".to_string(),
            ttl_days: 5,
            compute_timeout: None,
        }
    }
}

impl QuickstartParams {
    // look for `{program_name}.nada.bin` in `dir`
    pub fn with_program_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.program_path = mir_path(&dir.into(), &self.program_name);
        self
    }
}

/// Run the quickstart against whatever cluster `connect` reaches.
///
/// Telemetry is recorded once per milestone: `InitialSetup`, `ProgramStored`,
/// `SecretStored`, `ComputationStarted` and `ComputationComplete`. The returned
/// values are the outputs of the first finished computation event.
pub async fn run<C, P, F>(
    config: &Config,
    params: &QuickstartParams,
    wallet: &Wallet,
    connect: F,
    payments: &P,
    telemetry: &dyn TelemetrySink,
) -> Result<NadaValues>
where
    C: NillionClient,
    P: PaymentsClient + ?Sized,
    F: FnOnce(&UserKey, &NodeKey) -> C,
{
    let cluster_id = config.cluster_id.as_str();

    // 1. identities and client
    let user_key = UserKey::from_seed(&params.seed);
    let node_key = NodeKey::from_seed(&params.seed);
    let client = connect(&user_key, &node_key);
    let party_id = client.party_id();
    let user_id = client.user_id();
    info!("User `{user_id}` connected through party `{party_id}` to cluster `{cluster_id}`");
    let payments_config = config.payments_config();
    info!(
        "Paying from `{}` on chain `{}` via `{}`",
        wallet.address(),
        payments_config.chain_id,
        payments_config.grpc_endpoint
    );
    telemetry.record(
        telemetry::INITIAL_SETUP,
        Some(&properties([
            ("cluster_id", json!(cluster_id)),
            ("user_id", json!(user_id.to_string())),
        ])),
    );

    // 2. pay for and store the program
    let operation = Operation::store_program(&params.program_name, &params.program_path)?;
    let receipt = get_quote_and_pay(&client, &operation, wallet, payments, cluster_id).await?;
    let action_id = client
        .store_program(cluster_id, &params.program_name, &params.program_path, receipt)
        .await?;
    telemetry.record(
        telemetry::PROGRAM_STORED,
        Some(&properties([
            ("program_name", json!(params.program_name)),
            ("action_id", json!(action_id.to_string())),
        ])),
    );
    let program_id = ProgramId::new(user_id, params.program_name.as_str());
    println!("Stored program. action_id: {action_id}");
    println!("Stored program_id: {program_id}");

    // 3. pay for and store the secret, computable by ourselves with this program only
    let secret = NadaValues::from([(
        params.secret_name.as_str(),
        NadaValue::SecretInteger(params.secret_value),
    )]);
    let mut permissions = Permissions::default_for_user(user_id);
    permissions.add_compute_permissions([(user_id, [program_id.clone()])]);
    let operation = Operation::store_values(&secret, params.ttl_days);
    let receipt = get_quote_and_pay(&client, &operation, wallet, payments, cluster_id).await?;
    let store_id = client
        .store_values(cluster_id, &secret, &permissions, receipt)
        .await?;
    println!("Computing using program {program_id}");
    println!("Use secret store_id: {store_id}");
    telemetry.record(
        telemetry::SECRET_STORED,
        Some(&properties([("store_id", json!(store_id.to_string()))])),
    );

    // 4. bind parties, pay for and start the computation
    let mut bindings = ProgramBindings::new(program_id.clone());
    bindings.add_input_party(params.party_name.as_str(), party_id);
    bindings.add_output_party(params.party_name.as_str(), party_id);
    let compute_time_secrets = NadaValues::from([(
        params.compute_secret_name.as_str(),
        NadaValue::SecretInteger(params.compute_secret_value),
    )]);
    let operation = Operation::compute(&program_id, &compute_time_secrets);
    let receipt = get_quote_and_pay(&client, &operation, wallet, payments, cluster_id).await?;
    let compute_id = client
        .compute(cluster_id, &bindings, &[store_id], &compute_time_secrets, receipt)
        .await?;
    telemetry.record(
        telemetry::COMPUTATION_STARTED,
        Some(&properties([("compute_id", json!(compute_id.to_string()))])),
    );
    println!("Computation started. compute_id: {compute_id}");

    // 5. wait for the result
    let (finished_id, result) = wait_for_result(&client, params.compute_timeout).await?;
    println!("✅  Compute complete for compute_id {finished_id}");
    println!("🖥️  The result is {}", result.value);
    telemetry.record(
        telemetry::COMPUTATION_COMPLETE,
        Some(&properties([("compute_id", json!(finished_id.to_string()))])),
    );
    Ok(result.value)
}

/// Poll compute events until one reports a finished computation.
///
/// Other events are skipped. A closed stream is an error rather than a reason
/// to keep waiting; so is exceeding `timeout` when one is given.
pub async fn wait_for_result<C>(
    client: &C,
    timeout: Option<Duration>,
) -> Result<(ComputeId, ComputeResult)>
where
    C: NillionClient + ?Sized,
{
    let wait = async {
        loop {
            match client.next_compute_event().await {
                Some(ComputeEvent::Finished { compute_id, result }) => return Ok((compute_id, result)),
                Some(other) => debug!("Skipping compute event: {other:?}"),
                None => return Err(Error::EventStreamClosed),
            }
        }
    };
    match timeout {
        Some(limit) => tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| Error::ComputeTimeout(limit))?,
        None => wait.await,
    }
}
