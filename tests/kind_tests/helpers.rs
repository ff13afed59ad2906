//! Shared setup for cluster-backed tests

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, CustomResourceExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use bucket_operator::config::ControllerConfig;
use bucket_operator::controller::{Context, Runner};
use bucket_operator::crd::{BucketAccess, BucketClaim, BucketClass};
use bucket_operator::driver::{DriverRegistry, FakeDriver};
use bucket_operator::informer;
use bucket_operator::retry::RetryConfig;

/// Namespace every test works in
pub const TEST_NAMESPACE: &str = "bucket-operator-e2e";

/// Connect to the cluster and make sure CRDs and the test namespace exist
pub async fn ensure_test_cluster() -> Result<Client, kube::Error> {
    let client = Client::try_default().await?;

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply("bucket-operator-e2e").force();
    for crd in [BucketClass::crd(), BucketClaim::crd(), BucketAccess::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        crds.patch(&name, &params, &Patch::Apply(&crd)).await?;
    }
    // New CRDs take a moment to be served
    tokio::time::sleep(Duration::from_secs(2)).await;

    let namespaces: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    match namespaces.create(&PostParams::default(), &ns).await {
        Ok(_) => {}
        Err(kube::Error::Api(ae)) if ae.code == 409 => {}
        Err(e) => return Err(e),
    }

    Ok(client)
}

/// A controller running in the test process
pub struct RunningController {
    /// Backend the controller provisions on
    pub driver: Arc<FakeDriver>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    watchers: Vec<JoinHandle<()>>,
}

impl RunningController {
    /// Stop workers and watches
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.task).await;
        for watcher in &self.watchers {
            watcher.abort();
        }
    }
}

/// Start claim and access controllers with a `fake` backend
pub fn start_controller(client: Client) -> RunningController {
    let driver = Arc::new(FakeDriver::new());
    let drivers = DriverRegistry::new().with("fake", driver.clone());
    let ctx = Arc::new(Context::builder(client.clone()).drivers(drivers).build());
    let config = ControllerConfig {
        workers: 2,
        retry: RetryConfig::new(Duration::from_millis(200), Duration::from_secs(2)),
        ..Default::default()
    };
    let runner = Runner::new(ctx, config);

    let claims: Api<BucketClaim> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let accesses: Api<BucketAccess> = Api::namespaced(client, TEST_NAMESPACE);
    let watchers = vec![
        tokio::spawn(informer::run(claims, runner.claim_router())),
        tokio::spawn(informer::run(accesses, runner.access_router())),
    ];

    let (stop, stopped) = oneshot::channel();
    let task = tokio::spawn(runner.run(async {
        let _ = stopped.await;
    }));

    RunningController {
        driver,
        stop: Some(stop),
        task,
        watchers,
    }
}

/// Poll `check` until it returns `Some` or `timeout` passes
pub async fn wait_for<T, F, Fut>(timeout: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if let Some(value) = check().await {
            return Some(value);
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    None
}

/// Delete a namespaced object, ignoring errors
pub async fn cleanup<K>(api: &Api<K>, name: &str)
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    let _ = api.delete(name, &DeleteParams::default()).await;
}
