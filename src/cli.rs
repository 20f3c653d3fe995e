use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use shorts_studio::api::tts::{Language, TtsProvider};
use shorts_studio::config::AppConfig;
use shorts_studio::generator::{Generator, PlanRequest, RenderOptions, ShortsRequest, plan_with};
use shorts_studio::narration::segment_script;
use shorts_studio::pool::VideoPool;
use shorts_studio::subtitle::build_cues;
use shorts_studio::{init, srt};

/// Offline planning and one-shot generation for vertical shorts
#[derive(Parser, Debug)]
#[command(name = "shorts-cli", author, version, about, long_about = None)]
struct Cli {
    /// JSON config file, overlaid by environment variables
    #[arg(short, long, global = true, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct ScriptArgs {
    /// Narration script, one line per segment
    #[arg(long, conflicts_with = "script_file")]
    script: Option<String>,

    /// Read the script from a file
    #[arg(long)]
    script_file: Option<PathBuf>,

    /// Per-line durations in seconds
    #[arg(long, value_delimiter = ',')]
    durations: Vec<f64>,

    /// Total narration length in seconds
    #[arg(long, default_value_t = 30.0)]
    total: f64,
}

impl ScriptArgs {
    fn load(&self) -> Result<Option<String>> {
        match (&self.script, &self.script_file) {
            (Some(s), _) => Ok(Some(s.clone())),
            (None, Some(path)) => std::fs::read_to_string(path)
                .map(Some)
                .with_context(|| format!("Failed to read {}", path.display())),
            (None, None) => Ok(None),
        }
    }

    fn durations(&self) -> Option<Vec<f64>> {
        (!self.durations.is_empty()).then(|| self.durations.clone())
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print segments, cues and the clip allocation without rendering
    Plan {
        #[command(flatten)]
        script: ScriptArgs,

        /// Sub-folder of inputs/ to draw clips from
        #[arg(long)]
        input_folder: Option<String>,

        /// Seed for a reproducible allocation
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Write subtitle cues for a script as an SRT file
    Srt {
        #[command(flatten)]
        script: ScriptArgs,

        /// Output path
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Synthesize and render one short
    Generate {
        #[command(flatten)]
        script: ScriptArgs,

        #[arg(long, default_value = "")]
        title: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Voice id or keyword (random, neutral, surprise)
        #[arg(long)]
        voice: Option<String>,

        /// elevenlabs, azure or google
        #[arg(long)]
        provider: Option<String>,

        /// ko or en
        #[arg(long)]
        language: Option<String>,

        /// Track file name, `random` or `none`
        #[arg(long)]
        music: Option<String>,

        #[arg(long)]
        music_folder: Option<String>,

        #[arg(long)]
        input_folder: Option<String>,

        #[arg(long)]
        template: Option<String>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    shorts_studio::init_logging();

    let cli = Cli::parse();
    let config = AppConfig::load(Some(&cli.config)).await?;

    match cli.command {
        Commands::Plan {
            script,
            input_folder,
            seed,
        } => {
            let request = PlanRequest {
                script: script.load()?,
                segment_durations: script.durations(),
                total_duration: script.total,
                input_folder: input_folder.clone(),
                selected_video_files: Vec::new(),
            };
            let pool = VideoPool::load(&config.input_folder(input_folder.as_deref()), Some(&config.street_dir())).await?;
            let ffmpeg = shorts_studio::ffmpeg::Ffmpeg::new(&config.ffmpeg_path, &config.ffprobe_path);
            let mut rng = match seed {
                Some(s) => StdRng::seed_from_u64(s),
                None => StdRng::from_entropy(),
            };
            let plan = plan_with(&request, &pool, &ffmpeg, &mut rng).await?;
            print_json(&plan)
        }
        Commands::Srt { script, out } => {
            let text = script.load()?;
            let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
                bail!("a non-empty script is required");
            };
            let durations = script.durations();
            let segments = segment_script(Some(&text), durations.as_deref(), script.total);
            let cues = build_cues(&segments);
            srt::write_srt(&out, &cues).await?;
            println!("Wrote {} cues to {}", cues.len(), out.display());
            Ok(())
        }
        Commands::Generate {
            script,
            title,
            description,
            voice,
            provider,
            language,
            music,
            music_folder,
            input_folder,
            template,
        } => {
            let provider = match provider {
                Some(name) => Some(TtsProvider::from_name(&name).with_context(|| format!("unknown provider {name}"))?),
                None => None,
            };
            let language = match language {
                Some(name) => Some(Language::from_name(&name).with_context(|| format!("unknown language {name}"))?),
                None => None,
            };
            let request = ShortsRequest {
                script: script.load()?.unwrap_or_default(),
                title,
                description,
                voice,
                provider,
                language,
                options: RenderOptions {
                    background_music: music,
                    music_folder,
                    input_folder,
                    template,
                    ..RenderOptions::default()
                },
                ..ShortsRequest::default()
            };

            init::ensure_directories(&config).await?;
            let generator = Generator::new(Arc::new(config)).await?;
            if !init::check_ffmpeg(generator.ffmpeg()).await {
                bail!("ffmpeg is required to render");
            }
            let outcome = generator.generate_short(&request).await?;
            print_json(&outcome)
        }
    }
}
