// Fugata generator -- CLI entry point.
//
// Generates a chain of constraint-driven fugue episodes and writes the
// result to MIDI. The pipeline: build a demo subject, extract the motif
// pool, chain episodes across a small key plan, finalize, write MIDI.
//
// Usage:
//   cargo run -p fugata_engine -- [output.mid] [--seed N] [--voices N]
//     [--bars N] [--character NAME] [--key NAME] [--energy X] [--tempo BPM]
//
// Characters: severe, playful, noble, restless
// Keys: c, cs, d, ds, e, f, fs, g, gs, a, as, b

use std::path::Path;

use fugata_engine::episode::{EpisodeRequest, generate_episode};
use fugata_engine::fortspinnung::SubjectCharacter;
use fugata_engine::midi::write_midi;
use fugata_engine::motif::MotifPool;
use fugata_engine::note::{
    DEFAULT_VELOCITY, NoteEvent, NoteSource, TICKS_PER_BAR, TICKS_PER_BEAT, Tick,
    dedupe_voice_overlaps,
};
use fugata_engine::scale::Key;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let output_path = args
        .get(1)
        .filter(|s| !s.starts_with("--"))
        .map(|s| s.as_str())
        .unwrap_or("fugata.mid");
    let seed: u32 = parse_flag(&args, "--seed").unwrap_or(42);
    let num_voices: u8 = parse_flag(&args, "--voices").unwrap_or(3).clamp(1, 6);
    let bars_per_episode: u32 = parse_flag(&args, "--bars").unwrap_or(4).max(1);
    let energy: f32 = parse_flag(&args, "--energy").unwrap_or(0.5_f32).clamp(0.0, 1.0);
    let tempo: u16 = parse_flag(&args, "--tempo").unwrap_or(84);
    let character = parse_character(
        &parse_flag::<String>(&args, "--character").unwrap_or_else(|| "severe".to_string()),
    );
    let key = parse_key(&parse_flag::<String>(&args, "--key").unwrap_or_else(|| "c".to_string()));

    println!("=== Fugata Episode Generator ===");
    println!("Output: {output_path}");
    println!("Key: {} | Character: {character:?}", key_name(key));
    println!("Voices: {num_voices} | Bars/episode: {bars_per_episode}");
    println!("Seed: {seed} | Energy: {energy:.2} | Tempo: {tempo} BPM");
    println!();

    // 1. Subject and motif pool.
    println!("[1/4] Building subject and motif pool...");
    let subject = demo_subject(key);
    let pool = MotifPool::build(&subject, &[]);
    println!("  {} motifs in the pool.", pool.len());

    // 2. Key plan: tonic -> dominant -> tonic.
    let dominant = Key::from_pc(key.pc() + 7);
    let key_plan = [(key, dominant), (dominant, key), (key, key)];

    // 3. Chain episodes, carrying the exit state forward.
    println!("[2/4] Generating {} episodes...", key_plan.len());
    let episode_ticks = bars_per_episode * TICKS_PER_BAR;
    let mut notes: Vec<NoteEvent> = subject.clone();
    let mut entry_state = None;
    // Episodes start at the first bar line after the subject statement.
    let subject_end = subject.iter().map(NoteEvent::end_tick).max().unwrap_or(0);
    let mut start_tick = subject_end.div_ceil(TICKS_PER_BAR) * TICKS_PER_BAR;

    for (index, &(from, to)) in key_plan.iter().enumerate() {
        let mut request = EpisodeRequest::new(
            &pool,
            from,
            to,
            start_tick,
            episode_ticks,
            num_voices,
            character,
            seed.wrapping_add(index as u32),
        );
        request.episode_index = index as u32;
        request.energy = energy;
        request.entry_state = entry_state.take();

        let result = generate_episode(&request);
        println!(
            "  Episode {}: {} notes, {} -> {}{}",
            index + 1,
            result.notes.len(),
            key_name(from),
            key_name(result.achieved_key),
            if result.success { "" } else { " (deadlocked)" }
        );
        notes.extend(result.notes);
        entry_state = Some(result.exit_state);

        if !result.success {
            break;
        }
        start_tick += episode_ticks;
    }

    // 4. Finalize and write.
    println!("[3/4] Finalizing...");
    dedupe_voice_overlaps(&mut notes);
    println!("  {} notes after overlap dedup.", notes.len());

    println!("[4/4] Writing MIDI to {output_path}...");
    match write_midi(&notes, tempo, Path::new(output_path)) {
        Ok(()) => {
            let end_tick = notes.iter().map(|n| n.end_tick()).max().unwrap_or(0);
            let seconds = f64::from(end_tick) / f64::from(TICKS_PER_BEAT)
                / (f64::from(tempo) / 60.0);
            println!("  Done. {:.0}s ({:.1} bars).", seconds, f64::from(end_tick) / 1920.0);
        }
        Err(err) => {
            eprintln!("  Error writing MIDI: {err}");
            std::process::exit(1);
        }
    }
}

/// Demo subject: an arch over the tonic triad with a cadential tail.
fn demo_subject(key: Key) -> Vec<NoteEvent> {
    let tonic = 60 + i32::from(key.pc()) - if key.pc() > 6 { 12 } else { 0 };
    let degrees: [(i32, Tick); 8] = [
        (0, 480),
        (2, 480),
        (4, 240),
        (5, 240),
        (7, 480),
        (5, 240),
        (4, 240),
        (2, 960),
    ];
    let mut notes = Vec::with_capacity(degrees.len());
    let mut tick = 0;
    for (semis, duration) in degrees {
        notes.push(NoteEvent {
            start_tick: tick,
            duration,
            pitch: (tonic + semis).clamp(0, 127) as u8,
            velocity: DEFAULT_VELOCITY,
            voice: 0,
            source: NoteSource::FugueSubject,
        });
        tick += duration;
    }
    notes
}

fn parse_character(name: &str) -> SubjectCharacter {
    match name.to_lowercase().as_str() {
        "playful" => SubjectCharacter::Playful,
        "noble" => SubjectCharacter::Noble,
        "restless" => SubjectCharacter::Restless,
        "severe" => SubjectCharacter::Severe,
        other => {
            eprintln!("Unknown character '{other}'. Using severe.");
            SubjectCharacter::Severe
        }
    }
}

fn parse_key(name: &str) -> Key {
    let pc = match name.to_lowercase().as_str() {
        "c" => 0,
        "cs" | "c#" | "db" => 1,
        "d" => 2,
        "ds" | "d#" | "eb" => 3,
        "e" => 4,
        "f" => 5,
        "fs" | "f#" | "gb" => 6,
        "g" => 7,
        "gs" | "g#" | "ab" => 8,
        "a" => 9,
        "as" | "a#" | "bb" => 10,
        "b" => 11,
        other => {
            eprintln!("Unknown key '{other}'. Using C.");
            0
        }
    };
    Key::from_pc(pc)
}

fn key_name(key: Key) -> &'static str {
    match key.pc() {
        0 => "C",
        1 => "C#",
        2 => "D",
        3 => "Eb",
        4 => "E",
        5 => "F",
        6 => "F#",
        7 => "G",
        8 => "Ab",
        9 => "A",
        10 => "Bb",
        _ => "B",
    }
}

fn parse_flag<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|idx| args.get(idx + 1))
        .and_then(|value| value.parse().ok())
}
