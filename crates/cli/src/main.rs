mod rehearse;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use method_ai_core::config::{
    resolve_api_key, resolve_gemini_key, resolve_string_with_default, ApiKey, ApiKeys, AppConfig,
    Env, QuotaLimits, RehearsalTimings, StdEnv, DEFAULT_DIRECTION_DELAY_MS,
    DEFAULT_FAILURE_DELAY_MS, DEFAULT_GEMINI_MODEL, DEFAULT_NO_VOICE_DELAY_MS,
    DEFAULT_PERSONA_FILE, DEFAULT_STATE_FILE, DEFAULT_TTS_MODEL, ENV_ELEVENLABS_API_KEY,
    ENV_METHOD_AI_STATE,
};
use method_ai_core::generation::GenerationGateway;
use method_ai_core::llm::{EchoTransform, GeminiClient, TextTransform};
use method_ai_core::persist::{JsonFileStore, StudioPersistence};
use method_ai_core::persona::{JsonFilePersonaStore, NewPersona, PersonaFactory, PersonaStore};
use method_ai_core::quota::{QuotaService, StoredQuota, Tier};
use method_ai_core::tts::{ElevenLabsTtsClient, VoiceId};
use method_ai_core::voices::VoiceCatalogLoader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "method-ai")]
#[command(about = "Rehearse scenes turn by turn with AI scene partners")]
struct Cli {
    #[arg(long, global = true)]
    gemini_api_key: Option<String>,

    /// Operator key for speech synthesis.
    #[arg(long, global = true)]
    elevenlabs_api_key: Option<String>,

    #[arg(long, global = true, default_value = DEFAULT_GEMINI_MODEL)]
    gemini_model: String,

    #[arg(long, global = true, default_value = DEFAULT_TTS_MODEL)]
    tts_model: String,

    /// Where the script, cast and client id are kept between runs.
    #[arg(long, global = true, env = ENV_METHOD_AI_STATE)]
    state_file: Option<String>,

    #[arg(long, global = true, default_value = DEFAULT_PERSONA_FILE)]
    persona_file: PathBuf,

    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Rehearse a script. Without a file or prompt, the last saved script is used.
    Rehearse(RehearseArgs),
    /// Generate a script from a scene idea and save it.
    Generate {
        prompt: String,
    },
    /// Rewrite text in a persona's voice.
    Rewrite {
        text: String,
        #[arg(long, conflicts_with = "character_prompt")]
        persona: Option<String>,
        #[arg(long)]
        character_prompt: Option<String>,
    },
    /// Have a character respond to a scenario.
    Dialogue {
        #[arg(long)]
        scenario: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        traits: String,
    },
    /// List the voices available for casting.
    Voices,
    #[command(subcommand)]
    Personas(PersonaCmd),
    /// Show the speech quota for this client.
    Quota,
    /// Manage your own ElevenLabs key, which lifts the free-tier limit.
    #[command(subcommand)]
    Key(KeyCmd),
    /// Forget the saved script, prompt and cast.
    Reset,
    /// List audio output devices usable with --output-device.
    #[cfg(feature = "playback-device-enum")]
    Devices,
}

#[derive(Args, Debug)]
struct RehearseArgs {
    script: Option<PathBuf>,

    /// Generate the script from this idea instead of reading a file.
    #[arg(long, conflicts_with = "script")]
    prompt: Option<String>,

    /// Character you will read. Defaults to the first one who speaks.
    #[arg(long)]
    me: Option<String>,

    /// Discard the saved cast and cast again from scratch.
    #[arg(long)]
    recast: bool,

    /// Skip audio output; AI lines take a fixed moment instead.
    #[arg(long)]
    silent: bool,

    #[arg(long)]
    output_device: Option<String>,

    #[arg(long, default_value_t = DEFAULT_DIRECTION_DELAY_MS)]
    direction_delay_ms: u64,

    #[arg(long, default_value_t = DEFAULT_NO_VOICE_DELAY_MS)]
    no_voice_delay_ms: u64,

    #[arg(long, default_value_t = DEFAULT_FAILURE_DELAY_MS)]
    failure_delay_ms: u64,
}

#[derive(Subcommand, Debug)]
enum PersonaCmd {
    /// List built-in and custom personas.
    List,
    /// Create a custom persona; its system prompt is written by the language model.
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        voice: Option<String>,
    },
    Delete {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum KeyCmd {
    Set { key: String },
    Clear,
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    let env = StdEnv;
    let cfg = build_config(&cli, &env)?;
    tracing::debug!(
        state_file = %cfg.state_file.display(),
        gemini = cfg.api_keys.gemini.is_some(),
        elevenlabs = cfg.api_keys.elevenlabs.is_some(),
        "config loaded"
    );

    let store = Arc::new(
        JsonFileStore::open(&cfg.state_file)
            .with_context(|| format!("failed to open {}", cfg.state_file.display()))?,
    );
    let persistence = StudioPersistence::new(Arc::clone(&store));

    match cli.command {
        Cmd::Rehearse(args) => {
            let timings = RehearsalTimings::new(
                args.direction_delay_ms,
                args.no_voice_delay_ms,
                args.failure_delay_ms,
            )?;
            let cfg = AppConfig { timings, ..cfg };
            rehearse::run(&cfg, &persistence, args).await?;
        }
        Cmd::Generate { prompt } => {
            let script = gateway(&cfg)
                .generate_script(&prompt)
                .await
                .context("script generation failed")?;
            persistence.save_prompt(&prompt)?;
            persistence.save_script(&script)?;
            println!("{script}");
        }
        Cmd::Rewrite {
            text,
            persona,
            character_prompt,
        } => {
            let character_prompt = match (persona, character_prompt) {
                (_, Some(prompt)) => prompt,
                (Some(id), None) => {
                    let personas = persona_store(&cfg).all().await?;
                    personas
                        .into_iter()
                        .find(|p| p.id == id)
                        .with_context(|| format!("no persona with id {id}"))?
                        .system_prompt
                }
                (None, None) => anyhow::bail!("pass --persona or --character-prompt"),
            };
            let out = gateway(&cfg).rewrite(&text, &character_prompt).await?;
            println!("{out}");
        }
        Cmd::Dialogue {
            scenario,
            name,
            traits,
        } => {
            let out = gateway(&cfg)
                .generate_dialogue(&scenario, &name, &traits)
                .await?;
            println!("{out}");
        }
        Cmd::Voices => {
            let tts = ElevenLabsTtsClient::new(cfg.api_keys.elevenlabs.clone());
            let voices = VoiceCatalogLoader::new(Arc::new(tts))
                .with_credential(persistence.credential())
                .load()
                .await;
            if voices.is_empty() {
                println!("No voices available.");
            }
            for v in voices {
                println!("{}\t{}", v.id, v.display_name);
            }
        }
        Cmd::Personas(cmd) => run_personas(&cfg, cmd).await?,
        Cmd::Quota => {
            let client = persistence.client_id(&mut rand::rng())?;
            let quota = StoredQuota::new(cfg.quota, Arc::clone(&store));
            let status = quota.status(&client, persistence.has_credential());
            match status.tier {
                Tier::Unlimited => println!("Unlimited: using your own ElevenLabs key."),
                Tier::Free => {
                    println!(
                        "Free tier: {} of {} voice generations left, up to {} characters each.",
                        status.remaining.unwrap_or_default(),
                        status.limit.unwrap_or_default(),
                        status.character_limit.unwrap_or_default(),
                    );
                    let left = status
                        .reset_at
                        .and_then(|at| at.duration_since(SystemTime::now()).ok());
                    if let Some(left) = left {
                        println!("Resets in {} min.", left.as_secs().div_ceil(60));
                    }
                }
            }
        }
        Cmd::Key(KeyCmd::Set { key }) => {
            persistence.set_credential(Some(&ApiKey::new(key)?))?;
            println!("Saved. Speech requests now use your own key.");
        }
        Cmd::Key(KeyCmd::Clear) => {
            persistence.set_credential(None)?;
            println!("Removed your key. Back on the free tier.");
        }
        Cmd::Key(KeyCmd::Show) => match persistence.credential() {
            Some(key) => println!("{}", mask(key.expose())),
            None => println!("No key set."),
        },
        #[cfg(feature = "playback-device-enum")]
        Cmd::Devices => {
            for name in method_ai_core::playback::enumerate_output_device_names()? {
                println!("{name}");
            }
        }
        Cmd::Reset => {
            persistence.clear()?;
            println!("Cleared saved script, prompt and cast.");
        }
    }

    Ok(())
}

async fn run_personas(cfg: &AppConfig, cmd: PersonaCmd) -> anyhow::Result<()> {
    let store = persona_store(cfg);
    match cmd {
        PersonaCmd::List => {
            for p in store.all().await? {
                let voice = p.voice_id.as_ref().map(VoiceId::as_str).unwrap_or("-");
                let kind = if p.is_custom { "custom" } else { "built-in" };
                println!("{}\t{}\t{}\t{}", p.id, p.label, voice, kind);
            }
        }
        PersonaCmd::Create {
            name,
            description,
            voice,
        } => {
            let persona = store
                .create(NewPersona {
                    name,
                    description,
                    voice_id: voice.map(VoiceId),
                })
                .await?;
            println!("Created {} ({})", persona.label, persona.id);
            println!("{}", persona.system_prompt);
        }
        PersonaCmd::Delete { id } => {
            store.delete(id.clone()).await?;
            println!("Deleted {id}");
        }
    }
    Ok(())
}

pub(crate) fn text_transform(cfg: &AppConfig) -> Arc<dyn TextTransform> {
    match cfg.api_keys.gemini.clone() {
        Some(key) => Arc::new(GeminiClient::new(Some(key)).with_model(cfg.gemini_model.clone())),
        None => {
            tracing::warn!("no Gemini key configured; generated text will echo its input");
            Arc::new(EchoTransform::new())
        }
    }
}

pub(crate) fn gateway(cfg: &AppConfig) -> GenerationGateway {
    GenerationGateway::new(text_transform(cfg))
}

fn persona_store(cfg: &AppConfig) -> JsonFilePersonaStore {
    JsonFilePersonaStore::new(
        cfg.persona_file.clone(),
        PersonaFactory::new(text_transform(cfg)),
    )
}

fn mask(key: &str) -> String {
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{tail}")
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid --log-level: {level}"))?,
        )
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn build_config(cli: &Cli, env: &impl Env) -> anyhow::Result<AppConfig> {
    let gemini = resolve_gemini_key(cli.gemini_api_key.clone(), env)?;
    let elevenlabs = resolve_api_key(cli.elevenlabs_api_key.clone(), ENV_ELEVENLABS_API_KEY, env)?;
    let state_file = resolve_string_with_default(
        cli.state_file.clone(),
        ENV_METHOD_AI_STATE,
        env,
        DEFAULT_STATE_FILE,
    );

    Ok(AppConfig {
        api_keys: ApiKeys { gemini, elevenlabs },
        gemini_model: cli.gemini_model.clone(),
        tts_model: cli.tts_model.clone(),
        timings: RehearsalTimings::default(),
        quota: QuotaLimits::default(),
        state_file: PathBuf::from(state_file),
        persona_file: cli.persona_file.clone(),
    })
}
