//! Render job orchestration.
//!
//! Builds the processing chain from a [`RenderConfig`], performs per-slot
//! setup, drives the scheduler and writes the result. Setup problems that
//! only affect one feature of one slot (a missing preset, an unknown
//! parameter name) are logged and skipped; anything that leaves the chain
//! unusable aborts the job.

use crate::audio::{read_wav, write_wav};
use crate::config::{RenderConfig, SlotConfig};
use crate::midi::MidiTimeline;
use crate::render::{
    self, AudioBuffer, ProcessSetup, ProcessingUnitChain, ProcessingUnitSlot, RenderStats,
    UnitKind,
};
use crate::sysex;
use crate::units::{BuiltinHost, UnitHost};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Silence appended after the last MIDI event when no length is configured.
pub const RENDER_TAIL_SECONDS: f64 = 2.0;

/// What happened to one slot during setup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotReport {
    pub name: String,
    pub program: Option<String>,
    pub sysex_patch: Option<String>,
    pub preset_loaded: bool,
    pub unmatched_parameters: Vec<String>,
}

/// Summary of a finished job.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderReport {
    pub output: PathBuf,
    pub sample_rate: f64,
    pub channels: usize,
    pub samples: usize,
    pub stats: RenderStats,
    pub slots: Vec<SlotReport>,
}

/// Loads a configuration file and runs it with the built-in unit host.
pub fn run<P: AsRef<Path>>(config_path: P) -> Result<RenderReport> {
    let config_path = config_path.as_ref();
    let config = RenderConfig::load(config_path)
        .with_context(|| format!("Failed to load configuration: {}", config_path.display()))?;
    run_job(&config, &BuiltinHost::new())
}

/// Runs a validated configuration.
///
/// Instrument jobs render the first instrument's MIDI file through the chain.
/// Jobs without an instrument process `input_file` through the effects.
///
/// # Errors
///
/// Returns error if a unit cannot be created or prepared, the MIDI or input
/// file cannot be loaded, or the output cannot be written.
pub fn run_job(config: &RenderConfig, host: &dyn UnitHost) -> Result<RenderReport> {
    let output = config
        .output_file
        .clone()
        .context("Configuration has no output_file")?;

    let (buffer, sample_rate, stats, slots) = if config.has_instrument() {
        render_instruments(config, host)?
    } else {
        process_input(config, host)?
    };

    write_wav(&output, &buffer, sample_rate as u32, config.effective_bit_depth())
        .with_context(|| format!("Failed to write output file: {}", output.display()))?;

    Ok(RenderReport {
        output,
        sample_rate,
        channels: buffer.num_channels(),
        samples: buffer.num_samples(),
        stats,
        slots,
    })
}

type JobResult = (AudioBuffer, f64, RenderStats, Vec<SlotReport>);

fn render_instruments(config: &RenderConfig, host: &dyn UnitHost) -> Result<JobResult> {
    let sample_rate = config.sample_rate_or(crate::config::DEFAULT_SAMPLE_RATE);
    let channels = config.instrument_channels;

    let midi_path = config
        .first_instrument()
        .and_then(|slot| slot.midi_file.as_deref())
        .context("No instrument with a MIDI file")?;
    let ignored = config.slots().iter().filter(|s| s.is_instrument).count() - 1;
    if ignored > 0 {
        warn!(ignored, "only the first instrument's MIDI file is rendered");
    }

    let timeline = MidiTimeline::load(midi_path)
        .with_context(|| format!("Failed to load MIDI file: {}", midi_path.display()))?;

    let render_length = if config.render_length > 0.0 {
        config.render_length
    } else {
        timeline.total_length() + RENDER_TAIL_SECONDS
    };
    let total_samples = (render_length * sample_rate) as usize;
    info!(
        length = %format!("{:.2}s", render_length),
        samples = total_samples,
        sample_rate,
        channels,
        "render length"
    );

    let (mut chain, slots) = build_chain(config, host, sample_rate, channels)?;
    let mut buffer = AudioBuffer::new(channels, total_samples);
    let stats = render::render(&mut chain, &timeline, &mut buffer, sample_rate, config.buffer_size);
    if !stats.has_audio() {
        warn!("rendered audio is silent");
    }

    export_parameters_after(config, &mut chain);
    Ok((buffer, sample_rate, stats, slots))
}

fn process_input(config: &RenderConfig, host: &dyn UnitHost) -> Result<JobResult> {
    let input = config
        .input_file
        .as_deref()
        .context("No instrument and no input_file")?;
    let audio = read_wav(input)
        .with_context(|| format!("Could not read input file: {}", input.display()))?;

    let sample_rate = config.sample_rate_or(audio.sample_rate as f64);
    let mut buffer = audio.buffer;
    let channels = buffer.num_channels();

    let (mut chain, slots) = build_chain(config, host, sample_rate, channels)?;
    let stats = render::process_in_place(&mut chain, &mut buffer, sample_rate, config.buffer_size);

    export_parameters_after(config, &mut chain);
    Ok((buffer, sample_rate, stats, slots))
}

/// Instantiates, prepares and sets up every configured slot in order.
pub fn build_chain(
    config: &RenderConfig,
    host: &dyn UnitHost,
    sample_rate: f64,
    channels: usize,
) -> Result<(ProcessingUnitChain, Vec<SlotReport>)> {
    let mut chain = ProcessingUnitChain::new();
    let mut reports = Vec::with_capacity(config.slots().len());

    for (index, slot_config) in config.slots().iter().enumerate() {
        let name = slot_config.display_name();
        info!(slot = index, %name, path = %slot_config.path, "loading unit");

        let unit = host
            .instantiate(slot_config)
            .with_context(|| format!("Failed to load unit {}: {}", index + 1, slot_config.path))?;
        let kind = if slot_config.is_instrument {
            UnitKind::Instrument
        } else {
            UnitKind::Effect
        };
        let mut slot = ProcessingUnitSlot::new(name, kind, unit);

        let setup = ProcessSetup {
            sample_rate,
            max_block_size: config.buffer_size,
            input_channels: if slot.is_instrument() { 0 } else { channels },
            output_channels: channels,
        };
        slot.prepare(setup)
            .with_context(|| format!("Failed to prepare unit {}: {}", index + 1, name))?;

        let report = setup_slot(&mut slot, slot_config);
        chain.push(slot);
        reports.push(report);
    }

    info!(slots = chain.len(), "chain ready");
    Ok((chain, reports))
}

/// Program, SysEx, preset, parameters and the "before" export, in that order.
fn setup_slot(slot: &mut ProcessingUnitSlot, config: &SlotConfig) -> SlotReport {
    let mut report = SlotReport {
        name: slot.name().to_string(),
        ..Default::default()
    };

    if let Some(program) = config.program() {
        match slot.select_program(program) {
            Ok(name) => report.program = Some(name),
            Err(e) => warn!(slot = %slot.name(), program, error = %e, "program not set"),
        }
    }

    if let Some(path) = &config.sysex_file {
        report.sysex_patch = send_sysex_patch(slot, path, config.sysex_patch_number);
    }

    if let Some(path) = &config.preset {
        match fs::read(path) {
            Ok(state) => match slot.load_state(state) {
                Ok(()) => report.preset_loaded = true,
                Err(e) => warn!(slot = %slot.name(), error = %e, "preset rejected"),
            },
            Err(e) => warn!(path = %path.display(), error = %e, "could not read preset"),
        }
    }

    match slot.apply_parameters(config.parameters.as_slice()) {
        Ok(unmatched) => report.unmatched_parameters = unmatched,
        Err(e) => warn!(slot = %slot.name(), error = %e, "parameters not applied"),
    }

    if let Some(path) = &config.export_parameters_before {
        if let Err(e) = export_parameters(slot, path) {
            warn!(path = %path.display(), error = %e, "parameter export failed");
        }
    }

    report
}

fn send_sysex_patch(slot: &mut ProcessingUnitSlot, path: &Path, requested: i64) -> Option<String> {
    let patches = match sysex::load_bank(path) {
        Ok(patches) => patches,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read SysEx file");
            return None;
        }
    };
    if patches.is_empty() {
        warn!(path = %path.display(), "no patches found in SysEx file");
        return None;
    }

    let patch = sysex::select_patch(&patches, requested);
    info!(slot = %slot.name(), patch = %patch.name, "sending SysEx patch");
    slot.inject_sysex(sysex::build_device_message(&patch.data));
    Some(patch.name.clone())
}

fn export_parameters_after(config: &RenderConfig, chain: &mut ProcessingUnitChain) {
    for (slot_config, slot) in config.slots().iter().zip(chain.iter_mut()) {
        if let Some(path) = &slot_config.export_parameters_after {
            if let Err(e) = export_parameters(slot, path) {
                warn!(path = %path.display(), error = %e, "parameter export failed");
            }
        }
    }
}

/// Writes a slot's parameters as a pretty JSON array of `{index, name, value}`.
pub fn export_parameters(slot: &mut ProcessingUnitSlot, path: &Path) -> Result<()> {
    let params = slot.parameters()?;
    let json = serde_json::to_string_pretty(&params)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, json)
        .with_context(|| format!("Failed to write parameters: {}", path.display()))?;
    info!(slot = %slot.name(), path = %path.display(), count = params.len(), "parameters exported");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::{create_test_midi, MidiMessage};
    use crate::render::{
        AudioBlock, Configure, Configured, MidiBuffer, ParameterInfo, ProcessingUnit, UnitError,
    };
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Holds a constant level while any note is down; records SysEx.
    struct Tone {
        held: usize,
        level: f32,
        sysex: Rc<RefCell<Vec<Vec<u8>>>>,
    }

    impl ProcessingUnit for Tone {
        fn configure(&mut self, request: Configure) -> Result<Configured, UnitError> {
            match request {
                Configure::DescribeParameters => Ok(Configured::Parameters(vec![ParameterInfo {
                    index: 0,
                    name: "Level".to_string(),
                    value: self.level,
                }])),
                Configure::SetParameter { index: 0, value } => {
                    self.level = value;
                    Ok(Configured::Ready)
                }
                Configure::SetParameter { index, .. } => Err(UnitError::ParameterOutOfRange(index)),
                Configure::SelectProgram(_) => Err(UnitError::Unsupported("programs")),
                _ => Ok(Configured::Ready),
            }
        }

        fn process(&mut self, audio: &mut AudioBlock<'_>, midi: &MidiBuffer) {
            for event in midi {
                match &event.message {
                    MidiMessage::NoteOn { .. } => self.held += 1,
                    MidiMessage::NoteOff { .. } => self.held = self.held.saturating_sub(1),
                    MidiMessage::SysEx(bytes) => self.sysex.borrow_mut().push(bytes.clone()),
                    _ => {}
                }
            }
            let level = if self.held > 0 { self.level } else { 0.0 };
            for channel in audio.channels_mut() {
                channel.fill(level);
            }
        }
    }

    #[derive(Default)]
    struct TestHost {
        sysex: Rc<RefCell<Vec<Vec<u8>>>>,
    }

    impl UnitHost for TestHost {
        fn instantiate(&self, slot: &SlotConfig) -> Result<Box<dyn ProcessingUnit>, UnitError> {
            if slot.path == "test:tone" {
                Ok(Box::new(Tone {
                    held: 0,
                    level: 0.5,
                    sysex: Rc::clone(&self.sysex),
                }))
            } else {
                BuiltinHost::new().instantiate(slot)
            }
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vstrender_host_{}_{}", std::process::id(), name));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn bank_file(dir: &Path) -> PathBuf {
        let mut bytes = vec![0xF0, 0x43, 0x00, 0x09, 0x20, 0x00];
        for voice in 0..sysex::BANK_VOICES {
            let mut data = [voice as u8; sysex::PATCH_SIZE];
            data[118..128].copy_from_slice(format!("VOICE {:<4}", voice).as_bytes());
            bytes.extend_from_slice(&data);
        }
        bytes.extend_from_slice(&[0x00, 0xF7]);
        let path = dir.join("bank.syx");
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_instrument_job_end_to_end() {
        let dir = temp_dir("instrument");
        let midi = dir.join("chords.mid");
        create_test_midi(&midi, 2.0, 60, 120.0).unwrap();
        let bank = bank_file(&dir);

        let json = serde_json::json!({
            "output_file": dir.join("out/render.wav"),
            "sample_rate": 8000,
            "bit_depth": 32,
            "buffer_size": 256,
            "plugins": [
                {
                    "path": "test:tone",
                    "plugin_name": "Tone",
                    "is_instrument": true,
                    "midi_file": midi,
                    "program_number": 3,
                    "sysex_file": bank,
                    "sysex_patch_number": 2,
                    "parameters": { "level": 0.8, "cutoff": 0.1 },
                    "export_parameters_before": dir.join("before.json"),
                    "export_parameters_after": dir.join("after.json")
                },
                { "path": "builtin:gain", "parameters": { "Gain": -6.0206 } }
            ]
        });
        let config = RenderConfig::from_json(&json.to_string()).unwrap();
        let host = TestHost::default();
        let report = run_job(&config, &host).unwrap();

        // End of track at 2.0s plus the tail
        assert_eq!(report.samples, 32000);
        assert_eq!(report.channels, 2);
        assert_eq!(report.stats.note_ons_sent, 12);
        assert_eq!(report.stats.note_offs_sent, 12);
        assert!(report.stats.blocks_with_audio > 0);

        let tone = &report.slots[0];
        assert_eq!(tone.program, None);
        assert_eq!(tone.sysex_patch.as_deref(), Some("VOICE 2"));
        assert_eq!(tone.unmatched_parameters, vec!["cutoff".to_string()]);

        let sent = host.sysex.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].len(), sysex::DEVICE_MESSAGE_LEN);
        assert_eq!(sent[0][6], 2);

        let before: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join("before.json")).unwrap()).unwrap();
        assert_eq!(before[0]["name"], "Level");
        assert!((before[0]["value"].as_f64().unwrap() - 0.8).abs() < 1e-6);
        assert!(dir.join("after.json").exists());

        // 0.8 through -6.02 dB
        let mut reader = hound::WavReader::open(dir.join("out/render.wav")).unwrap();
        let peak = reader
            .samples::<f32>()
            .map(|s| s.unwrap().abs())
            .fold(0.0f32, f32::max);
        assert!((peak - 0.4).abs() < 1e-3);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_explicit_render_length() {
        let dir = temp_dir("length");
        let midi = dir.join("short.mid");
        create_test_midi(&midi, 1.0, 48, 120.0).unwrap();

        let json = serde_json::json!({
            "output_file": dir.join("out.wav"),
            "sample_rate": 1000,
            "render_length": 0.5,
            "buffer_size": 64,
            "plugins": [{ "path": "test:tone", "is_instrument": true, "midi_file": midi }]
        });
        let config = RenderConfig::from_json(&json.to_string()).unwrap();
        let report = run_job(&config, &TestHost::default()).unwrap();
        assert_eq!(report.samples, 500);
        assert_eq!(report.stats.blocks, 8);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_effects_only_job() {
        let dir = temp_dir("effects");
        let input = dir.join("in.wav");
        let source = AudioBuffer::from_channels(vec![vec![0.5; 3000]]);
        write_wav(&input, &source, 16000, 32).unwrap();

        let json = serde_json::json!({
            "input_file": input,
            "output_file": dir.join("out.wav"),
            "sample_rate": 0,
            "bit_depth": 32,
            "buffer_size": 1024,
            "plugins": [{ "path": "builtin:gain", "parameters": { "gain": 6.0206 } }]
        });
        let config = RenderConfig::from_json(&json.to_string()).unwrap();
        let report = run_job(&config, &TestHost::default()).unwrap();

        assert_eq!(report.sample_rate, 16000.0);
        assert_eq!(report.samples, 3000);
        assert_eq!(report.stats.blocks, 3);

        let output = crate::audio::read_wav(dir.join("out.wav")).unwrap();
        assert_eq!(output.buffer.num_channels(), 1);
        assert!(output.buffer.channel(0).iter().all(|s| (s - 1.0).abs() < 1e-3));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_unknown_unit_aborts_without_output() {
        let dir = temp_dir("unknown");
        let input = dir.join("in.wav");
        write_wav(&input, &AudioBuffer::new(2, 100), 44100, 16).unwrap();

        let json = serde_json::json!({
            "input_file": input,
            "output_file": dir.join("out.wav"),
            "plugins": [{ "path": "/plugins/Missing.vst3" }]
        });
        let config = RenderConfig::from_json(&json.to_string()).unwrap();
        let err = run_job(&config, &TestHost::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("Missing.vst3"));
        assert!(!dir.join("out.wav").exists());

        fs::remove_dir_all(&dir).unwrap();
    }
}
