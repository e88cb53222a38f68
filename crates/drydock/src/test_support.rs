//! Builders shared by unit tests.

use std::sync::Arc;

use camino::Utf8PathBuf;
use drydock_config::{Config, TestSelection};
use tempfile::TempDir;

use crate::context::{DaemonCommand, HarnessContext};
use crate::factory::DaemonFactory;
use crate::materialize::ConfigMaterializer;
use crate::orchestrator::ScopeKind;
use crate::ports::PortAllocator;
use crate::registry::FactoryRegistry;

pub(crate) struct FactoryFixture {
    pub factory: DaemonFactory,
    pub ports: Arc<PortAllocator>,
    pub registry: Arc<FactoryRegistry>,
    pub dir: TempDir,
}

pub(crate) fn factory_with(configure: impl FnOnce(HarnessContext) -> HarnessContext) -> FactoryFixture {
    let dir = TempDir::new().expect("temp dir");
    let config = Config {
        root_dir: Some(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 path")),
        kill_grace_ms: 200,
        ..Config::default()
    };
    let context = configure(
        HarnessContext::from_config(config, TestSelection::default())
            .with_command_for_all(&DaemonCommand::new("true"))
            .with_sftp_server(None),
    );
    let ports = Arc::new(PortAllocator::new(8));
    let materializer = Arc::new(ConfigMaterializer::new(dir.path(), false));
    let registry = Arc::new(FactoryRegistry::new(ScopeKind::Function));
    let factory = DaemonFactory::new(
        Arc::new(context),
        Arc::clone(&ports),
        materializer,
        Arc::clone(&registry),
    );
    FactoryFixture {
        factory,
        ports,
        registry,
        dir,
    }
}
