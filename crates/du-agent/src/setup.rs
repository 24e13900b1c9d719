//! Default handler registrations.
//!
//! | update type                                   | handler                 |
//! |-----------------------------------------------|-------------------------|
//! | `microsoft/update-manifest`, `:4`, `:5`       | steps                   |
//! | `microsoft/steps:1`                           | steps                   |
//! | `microsoft/components:1`                      | components              |
//! | `microsoft/bundle:1`                          | bundle                  |
//! | `microsoft/apt:1`, `script:1`, `swupdate:1`   | shell (or simulator)    |

use std::sync::Arc;

use du_agent_handlers::{
    BundleHandler, CommandLauncher, ComponentsHandler, ContentDownloader, ContentHandler,
    DownloadOptions, ExtensionManager, FileCopyDownloader, HandlerError, HttpContentDownloader,
    InventoryEnumerator, ShellCommandHandler, SimulatorHandler, StepsHandler,
    DEFAULT_REF_STEP_HANDLER,
};
use du_agent_handlers::downloader::{DownloadRequest, ProgressFn};
use du_agent_store::InstalledCriteriaStore;
use du_agent_workflow::FileEntity;
use tokio::runtime::Handle;

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};

/// Update type prefix of the top-level manifest handler.
pub const MANIFEST_HANDLER: &str = "microsoft/update-manifest";

/// Manifest versions with an explicit top-level handler registration.
pub const MANIFEST_VERSIONS: [u32; 2] = [4, 5];

/// Update type of the components composite.
pub const COMPONENTS_HANDLER: &str = "microsoft/components:1";

/// Update type of the bundle composite.
pub const BUNDLE_HANDLER: &str = "microsoft/bundle:1";

/// Leaf update types run through the privileged launcher.
pub const SHELL_UPDATE_TYPES: [&str; 3] = [
    "microsoft/apt:1",
    "microsoft/script:1",
    "microsoft/swupdate:1",
];

/// Routes downloads by URI scheme: `file://` is copied, everything else goes
/// over HTTP.
#[derive(Debug, Clone)]
pub struct RoutingDownloader {
    file: FileCopyDownloader,
    http: HttpContentDownloader,
}

impl RoutingDownloader {
    /// Create a router over the two bundled downloaders.
    #[must_use]
    pub const fn new(http: HttpContentDownloader) -> Self {
        Self {
            file: FileCopyDownloader::new(),
            http,
        }
    }
}

impl ContentDownloader for RoutingDownloader {
    fn download(
        &self,
        entity: &FileEntity,
        request: &DownloadRequest<'_>,
        progress: &ProgressFn,
    ) -> du_agent_handlers::Result<u64> {
        match entity.download_uri.as_deref() {
            Some(uri) if uri.starts_with("file://") => self.file.download(entity, request, progress),
            Some(uri) if uri.starts_with("http://") || uri.starts_with("https://") => {
                self.http.download(entity, request, progress)
            }
            other => Err(HandlerError::UnsupportedUri(
                other.unwrap_or_default().to_string(),
            )),
        }
    }
}

fn register_shared(extensions: &ExtensionManager, update_type: &str, handler: &Arc<dyn ContentHandler>) {
    let handler = Arc::clone(handler);
    extensions.register_handler(update_type, move || Ok(Arc::clone(&handler)));
}

/// Build a registry with the default handlers and collaborators.
///
/// The HTTP downloader drives its transfers on `runtime`.
///
/// # Errors
///
/// Returns `AgentError::ConfigRead` if the simulator script cannot be loaded,
/// or `AgentError::Extension` if the HTTP client cannot be built.
pub fn build_extensions(
    config: &AgentConfig,
    store: &Arc<dyn InstalledCriteriaStore>,
    launcher: &Arc<dyn CommandLauncher>,
    runtime: Handle,
) -> Result<ExtensionManager> {
    let extensions = ExtensionManager::new();
    let options = config.download_options();

    register_composites(&extensions, store, options);
    register_leaves(&extensions, config, store, launcher, options)?;

    let http = HttpContentDownloader::new(runtime)?;
    extensions.set_content_downloader(Arc::new(RoutingDownloader::new(http)));

    if let Some(inventory) = &config.components_inventory {
        tracing::info!(path = %inventory.display(), "Using component inventory");
        extensions.set_component_enumerator(Arc::new(InventoryEnumerator::new(inventory)));
    }

    tracing::debug!(?extensions, "Extensions registered");
    Ok(extensions)
}

/// Register the steps, components and bundle composites.
pub fn register_composites(
    extensions: &ExtensionManager,
    store: &Arc<dyn InstalledCriteriaStore>,
    options: DownloadOptions,
) {
    let steps: Arc<dyn ContentHandler> = Arc::new(StepsHandler::new(options));
    register_shared(extensions, MANIFEST_HANDLER, &steps);
    for version in MANIFEST_VERSIONS {
        register_shared(extensions, &format!("{MANIFEST_HANDLER}:{version}"), &steps);
    }
    register_shared(extensions, DEFAULT_REF_STEP_HANDLER, &steps);

    let store_for_components = Arc::clone(store);
    extensions.register_handler(COMPONENTS_HANDLER, move || {
        Ok(Arc::new(ComponentsHandler::new(
            Arc::clone(&store_for_components),
            options,
        )) as Arc<dyn ContentHandler>)
    });

    let store_for_bundle = Arc::clone(store);
    extensions.register_handler(BUNDLE_HANDLER, move || {
        Ok(Arc::new(BundleHandler::new(Arc::clone(&store_for_bundle), options))
            as Arc<dyn ContentHandler>)
    });
}

fn register_leaves(
    extensions: &ExtensionManager,
    config: &AgentConfig,
    store: &Arc<dyn InstalledCriteriaStore>,
    launcher: &Arc<dyn CommandLauncher>,
    options: DownloadOptions,
) -> Result<()> {
    let leaf: Arc<dyn ContentHandler> = if config.simulate {
        let simulator = match &config.simulator_script {
            Some(path) => SimulatorHandler::from_file(path).map_err(|source| {
                AgentError::ConfigRead {
                    path: path.clone(),
                    source,
                }
            })?,
            None => SimulatorHandler::new(),
        };
        tracing::warn!("Simulating leaf update types, no device changes are made");
        Arc::new(simulator)
    } else {
        Arc::new(ShellCommandHandler::new(
            Arc::clone(launcher),
            Arc::clone(store),
            options,
        ))
    };

    for update_type in SHELL_UPDATE_TYPES {
        register_shared(extensions, update_type, &leaf);
    }
    Ok(())
}
