use clap::{Parser, Subcommand, ValueEnum};
use thiserror::Error;

use crate::cache::handle::DataKind;

const MIB: usize = 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "mdlcache")]
#[command(version = concat!(env!("VERGEN_GIT_BRANCH"), "/", env!("VERGEN_GIT_SHA"), " (", env!("VERGEN_GIT_COMMIT_DATE"), ")"))]
#[command(about = "Loads, inspects and preloads studio models through the model cache")]
pub struct CliArgs {
    #[arg(long, env = "MDLCACHE_DATA_DIR", default_value_t = default_data_dir())]
    pub data_dir: String,

    #[arg(long, value_enum, default_value_t = PlatformProfile::Desktop, env = "MDLCACHE_PROFILE")]
    pub profile: PlatformProfile,

    /// Overrides the mesh section budget of the profile.
    #[arg(long, env = "MDLCACHE_MESH_BUDGET_MB")]
    pub mesh_budget_mb: Option<usize>,

    #[arg(long, default_value_t = 90)]
    pub dx_level: u32,

    #[arg(long, default_value_t = 0)]
    pub root_lod: u8,

    #[arg(long, env = "MDLCACHE_TRACE_LOAD")]
    pub trace_load: bool,

    #[command(subcommand)]
    pub operation_mode: OperationMode,
}

pub fn default_data_dir() -> String {
    std::env::current_dir()
        .map(|dir| dir.join("_data").to_string_lossy().to_string())
        .unwrap_or_else(|_| "_data".to_string())
}

#[derive(Subcommand, Debug)]
pub enum OperationMode {
    /// Prints the header of a model and which of its data kinds could be loaded.
    Inspect { model: String },
    /// Preloads models through the batch loader and prints the section usage.
    Preload {
        #[arg(required = true)]
        models: Vec<String>,
        #[arg(long, default_value_t = 4)]
        workers: usize,
    },
}

impl CliArgs {
    pub fn cache_settings(&self) -> Result<CacheSettings, SettingsError> {
        let mut settings = CacheSettings::for_profile(self.profile);
        settings.dx_level = self.dx_level;
        settings.trace_load = self.trace_load;
        settings.set_root_lod(self.root_lod)?;
        Ok(settings)
    }

    pub fn section_budgets(&self) -> Result<SectionBudgets, SettingsError> {
        let mut budgets = self.profile.section_budgets();
        if let Some(megabytes) = self.mesh_budget_mb {
            if megabytes == 0 {
                return Err(SettingsError::EmptyBudget { section: "mesh" });
            }

            budgets.mesh = Some(megabytes * MIB);
        }

        Ok(budgets)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Root LOD {lod} is out of range, at most {max} levels exist")]
    RootLodOutOfRange { lod: u8, max: u8 },

    #[error("The {section} section cannot have a budget of zero bytes")]
    EmptyBudget { section: &'static str },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum PlatformProfile {
    Desktop,
    Console,
}

/// Byte ceilings per section, `None` meaning unlimited.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct SectionBudgets {
    pub model: Option<usize>,
    pub mesh: Option<usize>,
    pub anim: Option<usize>,
}

impl PlatformProfile {
    pub fn section_budgets(&self) -> SectionBudgets {
        match self {
            PlatformProfile::Desktop => SectionBudgets::default(),
            PlatformProfile::Console => SectionBudgets {
                model: None,
                mesh: Some(20 * MIB),
                anim: Some(6 * MIB),
            },
        }
    }
}

/// Runtime switches of the model cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub async_mesh: bool,
    pub async_anims: bool,
    pub async_collision: bool,
    /// Pull included models and every animation block in when a header is loaded.
    pub force_data: bool,
    pub lock_headers_on_load: bool,
    pub compressed_vertexes: bool,
    pub root_lod: u8,
    pub fake_stall_ms: u64,
    pub test_not_available: bool,
    pub test_mesh_not_available: bool,
    pub test_verts_not_available: bool,
    pub trace_load: bool,
    pub verify_level: u32,
    pub dx_level: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            async_mesh: false,
            async_anims: false,
            async_collision: false,
            force_data: false,
            lock_headers_on_load: false,
            compressed_vertexes: false,
            root_lod: 0,
            fake_stall_ms: 0,
            test_not_available: false,
            test_mesh_not_available: false,
            test_verts_not_available: false,
            trace_load: false,
            verify_level: 0,
            dx_level: 90,
        }
    }
}

impl CacheSettings {
    pub const MAX_ROOT_LOD: u8 = 8;

    pub fn for_profile(profile: PlatformProfile) -> Self {
        match profile {
            PlatformProfile::Desktop => Self::default(),
            PlatformProfile::Console => Self {
                lock_headers_on_load: true,
                async_anims: true,
                compressed_vertexes: true,
                ..Self::default()
            },
        }
    }

    pub fn set_root_lod(&mut self, lod: u8) -> Result<(), SettingsError> {
        if lod >= Self::MAX_ROOT_LOD {
            return Err(SettingsError::RootLodOutOfRange {
                lod,
                max: Self::MAX_ROOT_LOD,
            });
        }

        self.root_lod = lod;
        Ok(())
    }

    pub fn vtx_extension(&self) -> &'static str {
        match self.dx_level {
            90.. => ".dx90.vtx",
            80..=89 => ".dx80.vtx",
            _ => ".sw.vtx",
        }
    }

    /// Headers are always read synchronously, so they report `false`.
    pub fn async_load(&self, kind: DataKind) -> bool {
        match kind {
            DataKind::HardwareMesh | DataKind::Vertexes => self.async_mesh,
            DataKind::AnimBlock => self.async_anims,
            DataKind::Collision => self.async_collision,
            DataKind::StudioHeader | DataKind::VirtualModel => false,
        }
    }

    /// Returns the previous value. Kinds without an async path ignore the request.
    pub fn set_async_load(&mut self, kind: DataKind, enabled: bool) -> bool {
        let previous = self.async_load(kind);
        match kind {
            DataKind::HardwareMesh | DataKind::Vertexes => self.async_mesh = enabled,
            DataKind::AnimBlock => self.async_anims = enabled,
            DataKind::Collision => self.async_collision = enabled,
            DataKind::StudioHeader | DataKind::VirtualModel => {}
        }
        previous
    }
}
