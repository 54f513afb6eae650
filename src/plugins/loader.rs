//! Plugin Loader
//!
//! Loads plugin modules into isolation units. A unit owns the library handle
//! for one module together with the factories the module registered; every
//! plugin instance built from it keeps a share of the handle, so the code is
//! unmapped only once the last instance and the last unit share are gone.
//!
//! Native modules are shared libraries exporting a [`PluginDeclaration`]
//! under [`DECLARATION_SYMBOL`], normally generated with
//! [`export_plugin!`](crate::export_plugin).

use crate::plugins::{LaunchdeckPlugin, PluginDescriptor, PluginError, PLUGIN_API_VERSION};
use libloading::Library;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::ops::Deref;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Exported symbol name of the module declaration
pub const DECLARATION_SYMBOL: &[u8] = b"launchdeck_plugin_declaration\0";

/// Constructs one plugin instance
pub type PluginConstructor = Box<dyn Fn() -> Box<dyn LaunchdeckPlugin> + Send + Sync>;

/// Box a function producing a concrete plugin as a [`PluginConstructor`]
pub fn constructor<P, F>(make: F) -> PluginConstructor
where
    P: LaunchdeckPlugin + 'static,
    F: Fn() -> P + Send + Sync + 'static,
{
    Box::new(move || Box::new(make()) as Box<dyn LaunchdeckPlugin>)
}

/// Collects the plugin types a module offers
pub trait PluginRegistrar {
    fn register_plugin(&mut self, type_name: &str, constructor: PluginConstructor);
}

/// Static data every native module exports
#[repr(C)]
pub struct PluginDeclaration {
    pub rustc_version: &'static str,
    pub api_version: &'static str,
    pub register: unsafe extern "C" fn(&mut dyn PluginRegistrar),
}

/// Export plugin types from a `cdylib` crate.
///
/// Each listed type must implement [`LaunchdeckPlugin`] and `Default`.
///
/// ```rust,ignore
/// #[derive(Default)]
/// struct ShaderPack;
///
/// #[async_trait::async_trait]
/// impl launchdeck::plugins::LaunchdeckPlugin for ShaderPack { /* ... */ }
///
/// launchdeck::export_plugin!(ShaderPack);
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($($plugin:ty),+ $(,)?) => {
        #[doc(hidden)]
        #[no_mangle]
        #[allow(non_upper_case_globals)]
        pub static launchdeck_plugin_declaration: $crate::plugins::PluginDeclaration =
            $crate::plugins::PluginDeclaration {
                rustc_version: $crate::RUSTC_VERSION,
                api_version: $crate::plugins::PLUGIN_API_VERSION,
                register: __launchdeck_register_plugins,
            };

        #[doc(hidden)]
        #[allow(improper_ctypes_definitions)]
        unsafe extern "C" fn __launchdeck_register_plugins(
            registrar: &mut dyn $crate::plugins::PluginRegistrar,
        ) {
            $(
                registrar.register_plugin(
                    ::std::any::type_name::<$plugin>(),
                    $crate::plugins::loader::constructor(
                        <$plugin as ::std::default::Default>::default,
                    ),
                );
            )+
        }
    };
}

/// A plugin type discovered in a module
pub struct PluginFactory {
    type_name: String,
    constructor: PluginConstructor,
}

impl PluginFactory {
    pub fn new(type_name: impl Into<String>, constructor: PluginConstructor) -> Self {
        Self {
            type_name: type_name.into(),
            constructor,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

impl std::fmt::Debug for PluginFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginFactory")
            .field("type_name", &self.type_name)
            .finish()
    }
}

#[derive(Default)]
struct FactoryCollector {
    factories: Vec<PluginFactory>,
}

impl PluginRegistrar for FactoryCollector {
    fn register_plugin(&mut self, type_name: &str, constructor: PluginConstructor) {
        debug!("Module registered plugin type {}", type_name);
        self.factories.push(PluginFactory::new(type_name, constructor));
    }
}

/// What keeps a module's code mapped
enum ModuleHandle {
    Native(Library),
    InProcess,
}

impl ModuleHandle {
    fn close(self, name: &str) {
        match self {
            ModuleHandle::Native(library) => {
                if let Err(e) = library.close() {
                    error!("Failed to close plugin library {}: {}", name, e);
                }
            }
            ModuleHandle::InProcess => {}
        }
    }
}

/// Ownership boundary of one loaded plugin module
pub struct IsolationUnit {
    name: String,
    path: PathBuf,
    // Declared before `handle`: factories hold code from the module.
    factories: Vec<PluginFactory>,
    handle: Option<Arc<ModuleHandle>>,
}

impl IsolationUnit {
    fn new(path: &Path, handle: ModuleHandle, factories: Vec<PluginFactory>) -> Self {
        let name = path
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or("<unnamed>")
            .to_string();
        Self {
            name,
            path: path.to_path_buf(),
            factories,
            handle: Some(Arc::new(handle)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        self.handle.is_some()
    }

    /// Plugin types the module registered
    pub fn find_contract_types(&self) -> &[PluginFactory] {
        &self.factories
    }

    /// Construct a default instance of `factory`'s plugin type
    pub fn instantiate(&self, factory: &PluginFactory) -> Result<Arc<PluginInstance>, PluginError> {
        let handle = self.handle.as_ref().ok_or_else(|| PluginError::InstantiationFailed {
            type_name: factory.type_name.clone(),
            reason: format!("module {} is already unloaded", self.name),
        })?;

        let plugin = std::panic::catch_unwind(AssertUnwindSafe(|| (factory.constructor)()))
            .map_err(|payload| PluginError::InstantiationFailed {
                type_name: factory.type_name.clone(),
                reason: format!("constructor panicked: {}", panic_message(payload.as_ref())),
            })?;

        let descriptor = PluginDescriptor::of(plugin.as_ref());
        if descriptor.id.trim().is_empty() {
            return Err(PluginError::InstantiationFailed {
                type_name: factory.type_name.clone(),
                reason: "plugin reports an empty id".to_string(),
            });
        }

        Ok(Arc::new(PluginInstance {
            plugin,
            descriptor,
            type_name: factory.type_name.clone(),
            _module: Arc::clone(handle),
        }))
    }

    /// Another share of this unit for one registered plugin. The share has
    /// no factories; it only keeps the module alive until it is unloaded.
    pub fn retain(&self) -> IsolationUnit {
        IsolationUnit {
            name: self.name.clone(),
            path: self.path.clone(),
            factories: Vec::new(),
            handle: self.handle.clone(),
        }
    }

    /// Release this unit's hold on the module.
    ///
    /// Returns `true` when the module was closed right away. When instances
    /// or other shares are still alive the module stays mapped until the
    /// last of them is dropped.
    pub fn unload(&mut self) -> bool {
        self.factories.clear();
        let Some(handle) = self.handle.take() else {
            return false;
        };

        match Arc::try_unwrap(handle) {
            Ok(module) => {
                module.close(&self.name);
                debug!("Released plugin module {}", self.name);
                true
            }
            Err(shared) => {
                debug!(
                    "Plugin module {} still referenced by {} holder(s); release deferred",
                    self.name,
                    Arc::strong_count(&shared) - 1
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for IsolationUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolationUnit")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("factories", &self.factories)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// A live plugin object together with its share of the owning module
pub struct PluginInstance {
    // Dropped before `_module` so plugin code is still mapped while it runs.
    plugin: Box<dyn LaunchdeckPlugin>,
    descriptor: PluginDescriptor,
    type_name: String,
    _module: Arc<ModuleHandle>,
}

impl PluginInstance {
    /// Identity snapshot taken at construction
    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn plugin(&self) -> &dyn LaunchdeckPlugin {
        self.plugin.as_ref()
    }
}

impl Deref for PluginInstance {
    type Target = dyn LaunchdeckPlugin;

    fn deref(&self) -> &Self::Target {
        self.plugin.as_ref()
    }
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PluginInstance {{ id: {}, type: {} }}", self.descriptor.id, self.type_name)
    }
}

/// Loader seam between the manager and a module format
#[async_trait::async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Load the module at `path` into a fresh isolation unit
    async fn load_module(&self, path: &Path) -> Result<IsolationUnit, PluginError>;

    /// Whether `path` looks like a module this loader understands
    fn can_load(&self, path: &Path) -> bool {
        path.extension()
            .and_then(OsStr::to_str)
            .map(|ext| {
                self.supported_extensions()
                    .iter()
                    .any(|supported| supported.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    fn supported_extensions(&self) -> Vec<&str>;
}

/// Native plugin loader for shared libraries (.so, .dylib, .dll)
#[derive(Debug, Default)]
pub struct NativeModuleLoader;

impl NativeModuleLoader {
    pub fn new() -> Self {
        Self
    }

    fn load_native_library(path: &Path) -> Result<IsolationUnit, PluginError> {
        std::fs::metadata(path)
            .map_err(|e| PluginError::LoadFailed(format!("Cannot read {:?}: {}", path, e)))?;

        debug!("Loading native library: {:?}", path);
        let library = unsafe {
            Library::new(path)
                .map_err(|e| PluginError::LoadFailed(format!("Failed to load library: {}", e)))?
        };

        let factories = {
            let declaration = unsafe {
                library
                    .get::<*const PluginDeclaration>(DECLARATION_SYMBOL)
                    .map_err(|e| {
                        PluginError::LoadFailed(format!("Missing plugin declaration: {}", e))
                    })?
            };
            // The symbol's address is the declaration static itself.
            let declaration: &PluginDeclaration = unsafe { &**declaration };
            collect_declared_factories(declaration)?
        };

        Ok(IsolationUnit::new(path, ModuleHandle::Native(library), factories))
    }
}

#[async_trait::async_trait]
impl ModuleLoader for NativeModuleLoader {
    async fn load_module(&self, path: &Path) -> Result<IsolationUnit, PluginError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::load_native_library(&path))
            .await
            .map_err(|e| PluginError::LoadFailed(format!("Loader task failed: {}", e)))?
    }

    fn supported_extensions(&self) -> Vec<&str> {
        if cfg!(target_os = "linux") {
            vec!["so"]
        } else if cfg!(target_os = "macos") {
            vec!["dylib"]
        } else if cfg!(target_os = "windows") {
            vec!["dll"]
        } else {
            vec![]
        }
    }
}

/// Validate a module's declaration and run its registration entry point
fn collect_declared_factories(declaration: &PluginDeclaration) -> Result<Vec<PluginFactory>, PluginError> {
    check_declaration(declaration.rustc_version, declaration.api_version)?;

    let mut collector = FactoryCollector::default();
    unsafe { (declaration.register)(&mut collector) };
    Ok(collector.factories)
}

/// Refuse modules built by another compiler or against an incompatible API
fn check_declaration(rustc_version: &str, api_version: &str) -> Result<(), PluginError> {
    if rustc_version != crate::RUSTC_VERSION {
        return Err(PluginError::IncompatibleAbi(format!(
            "built with {}, host uses {}",
            rustc_version,
            crate::RUSTC_VERSION
        )));
    }

    let requirement = semver::VersionReq::parse(&format!("^{}", PLUGIN_API_VERSION))
        .map_err(|e| PluginError::IncompatibleAbi(e.to_string()))?;
    let declared = semver::Version::parse(api_version).map_err(|e| {
        PluginError::IncompatibleAbi(format!("invalid plugin API version '{}': {}", api_version, e))
    })?;
    if !requirement.matches(&declared) {
        return Err(PluginError::IncompatibleAbi(format!(
            "plugin API {} is not compatible with host API {}",
            declared, PLUGIN_API_VERSION
        )));
    }
    Ok(())
}

type RegisterFn = Arc<dyn Fn(&mut dyn PluginRegistrar) + Send + Sync>;

/// Loader for modules linked into the host binary
///
/// Each module is a registration function bound to a file name; a matching
/// file must exist in the plugin directory for the module to be discovered.
/// Units go through the same discovery, instantiation, and release path as
/// native ones.
#[derive(Clone)]
pub struct InProcessModuleLoader {
    extension: String,
    modules: HashMap<String, RegisterFn>,
}

impl InProcessModuleLoader {
    pub const DEFAULT_EXTENSION: &'static str = "plugin";

    pub fn new() -> Self {
        Self {
            extension: Self::DEFAULT_EXTENSION.to_string(),
            modules: HashMap::new(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Bind `file_name` to a registration function
    pub fn with_module<F>(mut self, file_name: impl Into<String>, register: F) -> Self
    where
        F: Fn(&mut dyn PluginRegistrar) + Send + Sync + 'static,
    {
        self.modules.insert(file_name.into(), Arc::new(register));
        self
    }
}

impl Default for InProcessModuleLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ModuleLoader for InProcessModuleLoader {
    async fn load_module(&self, path: &Path) -> Result<IsolationUnit, PluginError> {
        tokio::fs::metadata(path)
            .await
            .map_err(|e| PluginError::LoadFailed(format!("Cannot read {:?}: {}", path, e)))?;

        let file_name = path.file_name().and_then(OsStr::to_str).unwrap_or_default();
        let register = self.modules.get(file_name).ok_or_else(|| {
            PluginError::LoadFailed(format!("{:?} is not a recognised plugin module", path))
        })?;

        let mut collector = FactoryCollector::default();
        std::panic::catch_unwind(AssertUnwindSafe(|| {
            register(&mut collector as &mut dyn PluginRegistrar)
        }))
        .map_err(
            |payload| {
                PluginError::LoadFailed(format!(
                    "Module registration panicked: {}",
                    panic_message(payload.as_ref())
                ))
            },
        )?;

        info!("Loaded in-process module {} ({} plugin types)", file_name, collector.factories.len());
        Ok(IsolationUnit::new(path, ModuleHandle::InProcess, collector.factories))
    }

    fn supported_extensions(&self) -> Vec<&str> {
        vec![self.extension.as_str()]
    }
}

impl std::fmt::Debug for InProcessModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut modules: Vec<&String> = self.modules.keys().collect();
        modules.sort();
        f.debug_struct("InProcessModuleLoader")
            .field("extension", &self.extension)
            .field("modules", &modules)
            .finish()
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        warn!("Plugin panicked with a non-string payload");
        "unknown panic".to_string()
    }
}
