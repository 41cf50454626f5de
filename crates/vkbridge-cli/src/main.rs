mod layout;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use vkbridge_core::{BridgeConfig, FeatureLevel};
use vkbridge_d3d11::native::NativeStage;
use vkbridge_d3d11::shader::{self, TranslateRequest};

use crate::layout::LayoutFile;

#[derive(Parser)]
#[command(name = "vkbridge")]
#[command(about = "vkbridge - Vulkan on a Direct3D 11-style backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a SPIR-V module to HLSL with flattened registers
    Translate {
        /// SPIR-V binary to translate
        input: String,

        /// Shader stage of the entry point
        #[arg(short, long, value_enum, default_value_t = Stage::Fragment)]
        stage: Stage,

        /// Entry point name
        #[arg(short, long, default_value = "main")]
        entry: String,

        /// Pipeline layout description (TOML); empty layout when omitted
        #[arg(short, long)]
        layout: Option<String>,

        /// Feature level used for slot limits and the shader profile
        #[arg(short, long, default_value = "11_0")]
        feature_level: FeatureLevel,

        /// First fragment UAV register (number of colour attachments)
        #[arg(long, default_value_t = 0)]
        uav_offset: u32,

        /// Leave bindings missing from the layout unbound
        #[arg(long)]
        tolerant: bool,

        /// Write the HLSL here instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Print the effective configuration
    Config {
        /// Configuration file path (default: VKBRIDGE_CONFIG or the platform path)
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Stage {
    Vertex,
    Fragment,
    Compute,
}

impl From<Stage> for NativeStage {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Vertex => NativeStage::Vertex,
            Stage::Fragment => NativeStage::Pixel,
            Stage::Compute => NativeStage::Compute,
        }
    }
}

fn main() -> anyhow::Result<()> {
    vkbridge_common::logging::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Translate {
            input,
            stage,
            entry,
            layout,
            feature_level,
            uav_offset,
            tolerant,
            output,
        } => {
            let stage = NativeStage::from(stage);
            let Some(profile) = shader::profile(feature_level, stage) else {
                bail!("{:?} shaders are not available at feature level {}", stage, feature_level);
            };

            let code = std::fs::read(&input).with_context(|| format!("reading {}", input))?;
            let description = match &layout {
                Some(path) => LayoutFile::load(path)?,
                None => LayoutFile::default(),
            };
            let pipeline_layout = description.build(feature_level)?;
            let bindings = pipeline_layout.get_shader_bindings();

            info!("translating {} ({} bytes) as {:?}", input, code.len(), stage);
            let translation = shader::translate(
                &code,
                &TranslateRequest {
                    stage,
                    entry_point: &entry,
                    specialization: &[],
                    bindings,
                    uav_offset,
                    tolerant,
                },
            )?;

            match &output {
                Some(path) => {
                    std::fs::write(path, &translation.source).with_context(|| format!("writing {}", path))?;
                    eprintln!("HLSL written to {}", path);
                }
                None => println!("{}", translation.source),
            }

            eprintln!("Entry point:    {}", translation.entry_point);
            eprintln!("Profile:        {}", profile);
            eprintln!("Push constants: {}", translation.push_constants);
            eprintln!("Bindings:");
            if bindings.is_empty() {
                eprintln!("  (none)");
            }
            for row in crate::layout::binding_table(bindings) {
                eprintln!("  {}", row);
            }
        }

        Commands::Config { config } => {
            let path = config.unwrap_or_else(vkbridge_common::platform::default_config_path);
            let effective = if std::path::Path::new(&path).exists() {
                BridgeConfig::load(&path)?
            } else {
                eprintln!("{} not found, showing defaults", path);
                BridgeConfig::default()
            };
            println!("# {} ({})", path, vkbridge_common::platform::platform_name());
            print!("{}", toml::to_string_pretty(&effective)?);
        }
    }

    Ok(())
}
