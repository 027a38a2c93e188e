use crate::{gateway, RehearseArgs};
use anyhow::Context;
use method_ai_core::cast::Role;
use method_ai_core::config::{ApiKey, AppConfig};
use method_ai_core::dictation::UnsupportedDictation;
use method_ai_core::persist::{KeyValueStore, StudioPersistence};
use method_ai_core::playback::{AudioPlaybackSink, PlaybackSink, SilentPlaybackSink};
use method_ai_core::quota::StoredQuota;
use method_ai_core::rehearsal::{
    BannerObserver, Event, Notice, Phase, RateLimitBanner, RehearsalEngine, RehearsalSession,
};
use method_ai_core::script::{normalize_name, CueKind};
use method_ai_core::tts::{ElevenLabsTtsClient, QuotaGatedTtsClient, VoiceId};
use method_ai_core::voices::{VoiceCatalogEntry, VoiceCatalogLoader};
use rand::seq::IndexedRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

const LOG_TARGET: &str = "cli::rehearse";
const SILENT_HOLD: Duration = Duration::from_millis(1500);

const HELP: &str = "\
Enter  finish your line
s      skip the current cue
p      pause / resume
r      restart from the top
k KEY  use your own ElevenLabs key
q      quit";

enum Input {
    Notice(Notice),
    Line(Option<String>),
    Event(Event),
}

enum Flow {
    Continue,
    Quit,
}

pub(crate) async fn run<S: KeyValueStore + Clone + 'static>(
    cfg: &AppConfig,
    persistence: &StudioPersistence<S>,
    args: RehearseArgs,
) -> anyhow::Result<()> {
    let restored = persistence.load();
    let script = match (&args.script, &args.prompt) {
        (Some(path), _) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, Some(prompt)) => {
            let script = gateway(cfg)
                .generate_script(prompt)
                .await
                .context("script generation failed")?;
            persistence.save_prompt(prompt)?;
            script
        }
        (None, None) => restored
            .script
            .clone()
            .context("no saved script; pass a script file or --prompt")?,
    };
    persistence.save_script(&script)?;

    let mut engine = RehearsalEngine::new(cfg.timings, false);
    engine.set_script(&script)?;
    engine
        .confirm_script()
        .context("nothing to rehearse in this script")?;

    if !args.recast {
        if let Some(saved) = restored.assignments {
            engine.set_assignments(saved)?;
        }
    }

    let elevenlabs = ElevenLabsTtsClient::new(cfg.api_keys.elevenlabs.clone())
        .with_model(cfg.tts_model.clone());
    let credential = persistence.credential();
    let voices = VoiceCatalogLoader::new(Arc::new(elevenlabs.clone()))
        .with_credential(credential.clone())
        .load()
        .await;

    engine.auto_cast(&voices, &mut rand::rng())?;
    if let Some(me) = args.me.as_deref() {
        cast_user(&mut engine, &normalize_name(me), &voices)?;
    }
    persistence.save_assignments(engine.assignments())?;
    print_cast(&engine);

    let quota = Arc::new(StoredQuota::new(cfg.quota, persistence.store().clone()));
    let tts = QuotaGatedTtsClient::new(elevenlabs, quota);
    let playback: Arc<dyn PlaybackSink> = if args.silent {
        Arc::new(SilentPlaybackSink::new().with_hold(SILENT_HOLD))
    } else {
        match args.output_device {
            Some(device) => Arc::new(AudioPlaybackSink::new().with_output_device_name(device)),
            None => Arc::new(AudioPlaybackSink::new()),
        }
    };

    let banner = BannerObserver::new();
    let mut session = RehearsalSession::new(
        engine,
        Arc::new(tts),
        playback,
        Box::new(UnsupportedDictation),
    )
    .with_credential(credential)
    .with_client_id(persistence.client_id(&mut rand::rng())?)
    .with_observer(Box::new(banner.clone()));
    let mut notices = session.subscribe();

    println!("{HELP}\n");
    session.start()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let input = tokio::select! {
            biased;
            Some(notice) = notices.recv() => Input::Notice(notice),
            line = lines.next_line() => Input::Line(line.context("failed to read stdin")?),
            event = session.next_event() => Input::Event(event),
        };

        match input {
            Input::Notice(notice) => render_notice(&session, &banner, notice),
            Input::Event(event) => session.handle(event),
            Input::Line(None) => {
                tracing::debug!(target: LOG_TARGET, "stdin closed");
                break;
            }
            Input::Line(Some(line)) => match apply(&mut session, persistence, line.trim()) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => break,
                Err(e) => println!("{e}"),
            },
        }
    }

    if matches!(session.phase(), Phase::Rehearsing | Phase::Paused) {
        session.stop()?;
    }
    Ok(())
}

/// Makes `me` the only user-read character; anyone else the user held goes to a voice.
fn cast_user(
    engine: &mut RehearsalEngine,
    me: &str,
    voices: &[VoiceCatalogEntry],
) -> anyhow::Result<()> {
    if !engine.script().characters.iter().any(|c| c == me) {
        anyhow::bail!(
            "{me} has no lines; characters are {}",
            engine.script().characters.join(", ")
        );
    }
    let others: Vec<String> = engine
        .assignments()
        .iter()
        .filter(|(name, a)| a.role == Role::User && name.as_str() != me)
        .map(|(name, _)| name.clone())
        .collect();
    let mut rng = rand::rng();
    for name in others {
        let voice = voices.choose(&mut rng).map(|v| VoiceId(v.id.clone()));
        engine.assign(&name, Role::Ai, voice)?;
    }
    engine.assign(me, Role::User, None)?;
    Ok(())
}

fn apply<S: KeyValueStore>(
    session: &mut RehearsalSession,
    persistence: &StudioPersistence<S>,
    line: &str,
) -> anyhow::Result<Flow> {
    match line {
        "" => session.user_done()?,
        "s" => session.skip()?,
        "p" => session.toggle_pause()?,
        "r" => session.restart()?,
        "q" => return Ok(Flow::Quit),
        "?" | "h" => println!("{HELP}"),
        other => match other.strip_prefix("k ") {
            Some(key) => {
                let key = ApiKey::new(key.trim())?;
                persistence.set_credential(Some(&key))?;
                session.set_credential(Some(key));
                if session.phase() == Phase::Paused {
                    println!("Key saved. Press p to resume.");
                } else {
                    println!("Key saved.");
                }
            }
            None => println!("Unknown command {other:?}. Type ? for help."),
        },
    }
    Ok(Flow::Continue)
}

fn print_cast(engine: &RehearsalEngine) {
    println!("Cast:");
    for name in &engine.script().characters {
        match engine.assignments().get(name) {
            Some(a) if a.role == Role::User => println!("  {name}: you"),
            Some(a) => match &a.voice_id {
                Some(voice) => println!("  {name}: AI, voice {}", voice.as_str()),
                None => println!("  {name}: AI, no voice"),
            },
            None => println!("  {name}: unassigned"),
        }
    }
    println!();
}

fn render_notice(session: &RehearsalSession, banner: &BannerObserver, notice: Notice) {
    let engine = session.engine();
    match notice {
        Notice::PhaseChanged(Phase::Paused) => println!("Paused. p to resume."),
        Notice::PhaseChanged(Phase::Complete) => {
            println!("\nScene complete. r to run it again, q to quit.")
        }
        Notice::PhaseChanged(Phase::Casting) => println!("Stopped."),
        Notice::PhaseChanged(phase) => tracing::debug!(target: LOG_TARGET, %phase, "phase"),
        Notice::CueStarted { index } => {
            let Some(cue) = engine.script().cues.get(index) else {
                return;
            };
            match (cue.kind, cue.character.as_deref()) {
                (CueKind::Dialogue, Some(name)) => {
                    let yours = engine
                        .assignments()
                        .get(name)
                        .is_some_and(|a| a.role == Role::User);
                    if yours {
                        println!("{name} (you): {}\n  [Enter when done]", cue.text);
                    } else {
                        println!("{name}: {}", cue.text);
                    }
                }
                _ => println!("  {}", cue.text),
            }
        }
        Notice::RateLimited(quota) => {
            let shown = banner
                .banner()
                .unwrap_or_else(|| RateLimitBanner::from(&quota));
            println!("! {shown}");
            println!("  Type `k <your key>` then p to carry on.");
        }
        Notice::SynthesisFailed { index, message } => {
            println!("! Could not voice cue {}: {message}", index + 1)
        }
        Notice::PlaybackFailed { index, message } => {
            println!("! Could not play cue {}: {message}", index + 1)
        }
        Notice::DictationUnavailable => {
            tracing::debug!(target: LOG_TARGET, "no speech recognition; waiting for Enter")
        }
        Notice::DictationFailed(message) => {
            tracing::warn!(target: LOG_TARGET, %message, "dictation failed")
        }
        Notice::Transcript { interim, committed } => println!("  > {committed}{interim}"),
    }
}
