// Fugata: constraint-driven Baroque counterpoint generation.
//
// Generates multi-voice fugue episode material as symbolic note streams. The
// core is a three-layer evaluator that scores candidate notes one at a time:
// obligations (unresolved contrapuntal demands with deadlines), invariants
// (per-note hard/soft rules), and gravity (statistical pull toward reference
// style distributions). A Fortspinnung planner arranges motif-pool material
// into a Kernel/Sequence/Dissolution arc, and the episode generator walks
// the plan left-to-right, placing the best surviving candidate at each step.
//
// Architecture:
// - note.rs: Note events, provenance tags, tick conventions, overlap dedup
// - scale.rs: Keys, scale types, degree arithmetic, nearest-tone snapping
// - oracle.rs: Compiled-in transition tables (melodic pitch, duration,
//   vertical interval) with score and top-N queries
// - vocabulary.rs: Figure attestation lookup on 4-interval windows
// - obligation.rs: The obligation ledger (layer 1)
// - invariant.rs: Per-note hard/soft invariant checks (layer 2)
// - accumulator.rs: Section histograms + Jensen-Shannon divergence
// - gravity.rs: Phase-weighted composite scoring (layer 3)
// - constraint.rs: ConstraintState bundling the three layers
// - counterpoint.rs: Rule-evaluator capability trait + fugue rules
// - motif.rs: Read-only ranked motif pool built from the subject
// - transform.rs: Pure motif transformations (invert, retrograde, ...)
// - fortspinnung.rs: Kernel/Sequence/Dissolution step planner
// - episode.rs: The episode generator (public entry point)
// - midi.rs: Standard MIDI File output via midly
//
// The engine is deterministic given a seed: all randomness flows through
// fugata_prng, and the draw sequence is part of the output contract.

pub mod accumulator;
pub mod constraint;
pub mod counterpoint;
pub mod episode;
pub mod fortspinnung;
pub mod gravity;
pub mod invariant;
pub mod midi;
pub mod motif;
pub mod note;
pub mod obligation;
pub mod oracle;
pub mod scale;
pub mod transform;
pub mod vocabulary;
