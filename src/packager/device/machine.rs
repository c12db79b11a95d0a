//! Deployment state machine.
//!
//! `Idle -> Deploying -> {Succeeded, Cancelled, Failed}`. The strategy is
//! picked from the target kind and the session's hot-swap support:
//!
//! | target    | hot-swap | strategy                                   |
//! |-----------|----------|--------------------------------------------|
//! | simulator | yes      | push every `.cod`                          |
//! | simulator | no       | copy every `.cod` into the simulator folder|
//! | device    | yes      | push top-level `.jad` files                |
//! | device    | no       | loader tool, one `.jad` at a time          |
//!
//! Device preconditions (loader version, a connected device, connection
//! options) are checked before the machine enters `Deploying`.

use super::hotswap::{self, HotSwapSession};
use super::loader::{LoaderTool, MINIMUM_LOADER_VERSION};
use super::{Deliverable, DeploymentTarget, TargetKind};
use crate::packager::artifact::ArtifactKind;
use crate::packager::error::{Error, Result};
use crate::packager::status::Status;
use crate::packager::utils::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Delay between two device connection checks.
pub const DEVICE_RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeployState {
    #[default]
    Idle,
    Deploying,
    Succeeded,
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    SimulatorHotSwap,
    SimulatorCopy,
    DeviceHotSwap,
    DeviceNormal,
}

impl Strategy {
    pub fn select(kind: TargetKind, hot_swap: bool) -> Self {
        match (kind, hot_swap) {
            (TargetKind::Simulator, true) => Strategy::SimulatorHotSwap,
            (TargetKind::Simulator, false) => Strategy::SimulatorCopy,
            (TargetKind::Device, true) => Strategy::DeviceHotSwap,
            (TargetKind::Device, false) => Strategy::DeviceNormal,
        }
    }
}

/// What to do when no device is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceWait {
    /// Fail with "no device found"
    #[default]
    Once,
    /// Check again every [`DEVICE_RETRY_INTERVAL`] until cancelled
    UntilCancelled,
}

/// A connected device ready to receive code.
struct Connection {
    device: String,
    options: Vec<String>,
}

/// Runs one deployment against one target.
pub struct DeviceDeployer {
    session: Arc<dyn HotSwapSession>,
    loader: Option<Arc<dyn LoaderTool>>,
    wait: DeviceWait,
    retry_interval: Duration,
    state: DeployState,
}

impl DeviceDeployer {
    pub fn new(session: Arc<dyn HotSwapSession>, loader: Option<Arc<dyn LoaderTool>>) -> Self {
        Self {
            session,
            loader,
            wait: DeviceWait::default(),
            retry_interval: DEVICE_RETRY_INTERVAL,
            state: DeployState::Idle,
        }
    }

    pub fn wait_for_device(mut self, wait: DeviceWait) -> Self {
        self.wait = wait;
        self
    }

    /// Overrides [`DEVICE_RETRY_INTERVAL`].
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn state(&self) -> &DeployState {
        &self.state
    }

    /// Deploys `deliverables` to `target`.
    ///
    /// # Arguments
    ///
    /// * `target` - Simulator or device
    /// * `deliverables` - Published files of the batch
    /// * `cancel` - Abandons the deployment
    ///
    /// # Returns
    ///
    /// The final status; [`state`](Self::state) holds the matching terminal state.
    pub async fn deploy(
        &mut self,
        target: &DeploymentTarget,
        deliverables: &[Deliverable],
        cancel: &CancellationToken,
    ) -> Status {
        let strategy = Strategy::select(target.kind, self.session.supports_hot_swap());
        log::info!("deploying {} file(s) using {:?}", deliverables.len(), strategy);

        let connection = if target.kind == TargetKind::Device {
            match self.connect(target, cancel).await {
                Ok(Some(connection)) => Some(connection),
                Ok(None) => return self.finish(Status::Cancelled),
                Err(e) => return self.finish(Status::failed(e)),
            }
        } else {
            None
        };

        self.state = DeployState::Deploying;
        let status = match (strategy, connection) {
            (Strategy::SimulatorHotSwap, _) => {
                let cods = select(deliverables, ArtifactKind::Cod, false);
                hotswap::push_files(self.session.clone(), &cods, None, cancel).await
            }
            (Strategy::SimulatorCopy, _) => {
                let cods = select(deliverables, ArtifactKind::Cod, false);
                copy_to_simulator(cods, target.directory.clone()).await
            }
            (Strategy::DeviceHotSwap, Some(connection)) => {
                let jads = select(deliverables, ArtifactKind::Jad, true);
                hotswap::push_files(self.session.clone(), &jads, Some(connection.device), cancel)
                    .await
            }
            (Strategy::DeviceNormal, Some(connection)) => {
                let jads = select(deliverables, ArtifactKind::Jad, true);
                self.load_sequentially(&connection, jads, cancel).await
            }
            (_, None) => Status::failed("no device connection"),
        };
        self.finish(status)
    }

    fn finish(&mut self, status: Status) -> Status {
        self.state = match &status {
            Status::Ok => DeployState::Succeeded,
            Status::Cancelled => DeployState::Cancelled,
            Status::Failed(reason) => {
                log::error!("deployment failed: {}", reason);
                DeployState::Failed(reason.clone())
            }
        };
        status
    }

    fn loader(&self) -> Result<Arc<dyn LoaderTool>> {
        self.loader.clone().ok_or_else(|| {
            Error::MissingToolchain("no loader tool configured for device deployment".into())
        })
    }

    /// Checks the device preconditions. `None` means cancelled.
    async fn connect(
        &self,
        target: &DeploymentTarget,
        cancel: &CancellationToken,
    ) -> Result<Option<Connection>> {
        let loader = self.loader()?;

        let version = blocking(&loader, |l| l.version()).await?;
        if version < MINIMUM_LOADER_VERSION {
            return Err(Error::UnsupportedLoaderVersion {
                found: version,
                required: MINIMUM_LOADER_VERSION,
            });
        }

        let connected = loop {
            let connected = blocking(&loader, |l| l.connections()).await?;
            if !connected.is_empty() {
                break connected;
            }
            match self.wait {
                DeviceWait::Once => return Err(Error::NoDeviceFound),
                DeviceWait::UntilCancelled => {
                    log::info!(
                        "no device connected, checking again in {}s",
                        self.retry_interval.as_secs()
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.retry_interval) => {}
                        _ = cancel.cancelled() => return Ok(None),
                    }
                }
            }
        };

        let device = if target.is_any_device() {
            connected[0].clone()
        } else {
            connected
                .iter()
                .find(|d| d.eq_ignore_ascii_case(&target.identifier))
                .cloned()
                .ok_or_else(|| Error::DeviceNotFound {
                    requested: target.identifier.clone(),
                    connected: connected.clone(),
                })?
        };

        let lookup = device.clone();
        match blocking(&loader, move |l| l.connection_options(&lookup)).await? {
            Some(options) => Ok(Some(Connection { device, options })),
            None => {
                log::warn!("authentication with device {} declined", device);
                Ok(None)
            }
        }
    }

    /// Loads each descriptor in turn. The first failure aborts the rest.
    async fn load_sequentially(
        &self,
        connection: &Connection,
        descriptors: Vec<PathBuf>,
        cancel: &CancellationToken,
    ) -> Status {
        let loader = match self.loader() {
            Ok(loader) => loader,
            Err(e) => return Status::failed(e),
        };
        for descriptor in descriptors {
            if cancel.is_cancelled() {
                return Status::Cancelled;
            }
            log::info!("loading {} onto {}", descriptor.display(), connection.device);
            let options = connection.options.clone();
            if let Err(e) = blocking(&loader, move |l| l.load(&options, &descriptor)).await {
                return Status::failed(e);
            }
        }
        Status::Ok
    }
}

/// Files of `kind`, optionally without dependency-only projects.
fn select(deliverables: &[Deliverable], kind: ArtifactKind, top_level_only: bool) -> Vec<PathBuf> {
    deliverables
        .iter()
        .filter(|d| ArtifactKind::of_path(&d.path) == Some(kind))
        .filter(|d| !(top_level_only && d.dependency_only))
        .map(|d| d.path.clone())
        .collect()
}

async fn copy_to_simulator(cods: Vec<PathBuf>, directory: PathBuf) -> Status {
    let result = tokio::task::spawn_blocking(move || -> Result<usize> {
        fs::create_dir_all(&directory)?;
        fs::copy_into(&cods, &directory)
    })
    .await;
    match result {
        Ok(Ok(copied)) => {
            log::info!("copied {} file(s) to the simulator", copied);
            Status::Ok
        }
        Ok(Err(e)) => Status::failed(e),
        Err(e) => Status::failed(e),
    }
}

async fn blocking<T, F>(loader: &Arc<dyn LoaderTool>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn LoaderTool) -> Result<T> + Send + 'static,
{
    let loader = loader.clone();
    tokio::task::spawn_blocking(move || f(loader.as_ref())).await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packager::device::hotswap::tests::BlockingSession;
    use crate::packager::device::{ANY_DEVICE, NoHotSwap};
    use semver::Version;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Default)]
    struct FakeLoader {
        version: Option<Version>,
        devices: Vec<String>,
        decline: bool,
        fail_on: Option<String>,
        loaded: Mutex<Vec<PathBuf>>,
    }

    impl FakeLoader {
        fn with_device(device: &str) -> Self {
            Self {
                version: Some(Version::new(4, 6, 0)),
                devices: vec![device.to_string()],
                ..Default::default()
            }
        }
    }

    impl LoaderTool for FakeLoader {
        fn version(&self) -> Result<Version> {
            Ok(self.version.clone().unwrap_or(Version::new(4, 6, 0)))
        }

        fn connections(&self) -> Result<Vec<String>> {
            Ok(self.devices.clone())
        }

        fn connection_options(&self, device: &str) -> Result<Option<Vec<String>>> {
            Ok((!self.decline).then(|| vec![format!("-p{device}")]))
        }

        fn load(&self, _options: &[String], artifact: &Path) -> Result<()> {
            if self
                .fail_on
                .as_deref()
                .is_some_and(|f| artifact.ends_with(f))
            {
                return Err(Error::GenericError(format!("load of {} failed", artifact.display())));
            }
            self.loaded.lock().unwrap().push(artifact.to_path_buf());
            Ok(())
        }
    }

    fn deliverable(project: &str, file: &str, dependency_only: bool) -> Deliverable {
        Deliverable {
            project: project.into(),
            path: PathBuf::from(file),
            dependency_only,
        }
    }

    fn batch() -> Vec<Deliverable> {
        vec![
            deliverable("lib", "lib/lib.cod", true),
            deliverable("lib", "lib/lib.jad", true),
            deliverable("app", "app/app.cod", false),
            deliverable("app", "app/app-1.cod", false),
            deliverable("app", "app/app_full.jad", false),
            deliverable("tool", "tool/tool.jad", false),
        ]
    }

    #[test]
    fn strategy_follows_target_and_hot_swap_support() {
        assert_eq!(Strategy::select(TargetKind::Simulator, true), Strategy::SimulatorHotSwap);
        assert_eq!(Strategy::select(TargetKind::Device, true), Strategy::DeviceHotSwap);
        assert_eq!(Strategy::select(TargetKind::Device, false), Strategy::DeviceNormal);
        assert_eq!(Strategy::select(TargetKind::Simulator, false), Strategy::SimulatorCopy);
    }

    #[tokio::test]
    async fn simulator_hot_swap_registers_every_cod() {
        let (session, _release) = BlockingSession::new(true, Duration::ZERO);
        let mut deployer = DeviceDeployer::new(session.clone(), None);
        let status = deployer
            .deploy(&DeploymentTarget::simulator("/sim", "9800"), &batch(), &CancellationToken::new())
            .await;
        assert_eq!(status, Status::Ok);
        assert_eq!(deployer.state(), &DeployState::Succeeded);
        assert_eq!(session.registered.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn device_hot_swap_skips_dependency_only_descriptors() {
        let (session, _release) = BlockingSession::new(true, Duration::ZERO);
        let loader = Arc::new(FakeLoader::with_device("0x2100000A"));
        let mut deployer = DeviceDeployer::new(session.clone(), Some(loader));
        let status = deployer
            .deploy(&DeploymentTarget::device(ANY_DEVICE), &batch(), &CancellationToken::new())
            .await;
        assert_eq!(status, Status::Ok);
        assert_eq!(
            *session.registered.lock().unwrap(),
            [PathBuf::from("app/app_full.jad"), PathBuf::from("tool/tool.jad")]
        );
        assert_eq!(*session.pushed_to.lock().unwrap(), [Some("0x2100000A".to_string())]);
    }

    #[tokio::test]
    async fn device_hot_swap_cancel_is_prompt() {
        let (session, _release) = BlockingSession::new(true, Duration::from_secs(5));
        let loader = Arc::new(FakeLoader::with_device("0x2100000A"));
        let mut deployer = DeviceDeployer::new(session, Some(loader));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let status = deployer
            .deploy(&DeploymentTarget::device(ANY_DEVICE), &batch(), &cancel)
            .await;
        assert_eq!(status, Status::Cancelled);
        assert_eq!(deployer.state(), &DeployState::Cancelled);
        assert!(started.elapsed() <= hotswap::POLL_INTERVAL);
    }

    #[tokio::test]
    async fn normal_deployment_stops_at_first_failure() {
        let loader = Arc::new(FakeLoader {
            fail_on: Some("app_full.jad".into()),
            ..FakeLoader::with_device("0x2100000A")
        });
        let mut deployer = DeviceDeployer::new(Arc::new(NoHotSwap::default()), Some(loader.clone()));
        let status = deployer
            .deploy(&DeploymentTarget::device("0x2100000a"), &batch(), &CancellationToken::new())
            .await;
        assert!(status.is_failed());
        assert!(matches!(deployer.state(), DeployState::Failed(_)));
        // tool.jad comes after the failing descriptor and is never loaded
        assert!(loader.loaded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn device_preconditions_surface_specific_errors() {
        let session: Arc<dyn HotSwapSession> = Arc::new(NoHotSwap::default());
        let target = DeploymentTarget::device(ANY_DEVICE);
        let cancel = CancellationToken::new();

        let old = Arc::new(FakeLoader {
            version: Some(Version::new(4, 0, 2)),
            ..FakeLoader::with_device("0x1")
        });
        let status = DeviceDeployer::new(session.clone(), Some(old))
            .deploy(&target, &batch(), &cancel)
            .await;
        assert!(status.to_string().contains("4.0.2 is not supported"));

        let none = Arc::new(FakeLoader::default());
        let status = DeviceDeployer::new(session.clone(), Some(none))
            .deploy(&target, &batch(), &cancel)
            .await;
        assert!(status.to_string().contains("no device found"));

        let wrong = Arc::new(FakeLoader::with_device("0x2100000A"));
        let status = DeviceDeployer::new(session.clone(), Some(wrong))
            .deploy(&DeploymentTarget::device("0x99999999"), &batch(), &cancel)
            .await;
        assert!(status.to_string().contains("0x99999999"));

        let declined = Arc::new(FakeLoader {
            decline: true,
            ..FakeLoader::with_device("0x2100000A")
        });
        let mut deployer = DeviceDeployer::new(session, Some(declined));
        assert_eq!(deployer.deploy(&target, &batch(), &cancel).await, Status::Cancelled);
        assert_eq!(deployer.state(), &DeployState::Cancelled);
    }

    #[tokio::test]
    async fn waiting_for_a_device_ends_on_cancel() {
        let loader = Arc::new(FakeLoader::default());
        let mut deployer = DeviceDeployer::new(Arc::new(NoHotSwap::default()), Some(loader))
            .wait_for_device(DeviceWait::UntilCancelled)
            .retry_interval(Duration::from_millis(20));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let status = deployer
            .deploy(&DeploymentTarget::device(ANY_DEVICE), &batch(), &cancel)
            .await;
        assert_eq!(status, Status::Cancelled);
    }

    #[tokio::test]
    async fn simulator_without_hot_swap_receives_copies() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("app.cod"), b"cod").unwrap();
        std::fs::write(out.join("app.jad"), b"jad").unwrap();
        let deliverables = vec![
            deliverable("app", out.join("app.cod").to_str().unwrap(), false),
            deliverable("app", out.join("app.jad").to_str().unwrap(), false),
        ];
        let sim = dir.path().join("simulator");

        let mut deployer = DeviceDeployer::new(Arc::new(NoHotSwap::default()), None);
        let status = deployer
            .deploy(&DeploymentTarget::simulator(&sim, "9800"), &deliverables, &CancellationToken::new())
            .await;
        assert_eq!(status, Status::Ok);
        assert!(sim.join("app.cod").exists());
        assert!(!sim.join("app.jad").exists());
    }
}
