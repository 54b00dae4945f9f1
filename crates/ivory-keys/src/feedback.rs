//! Visual feedback and notation sinks
//!
//! The controller reports what is sounding to two fire-and-forget sinks:
//! a [`VisualFeedback`] that lights keys and spawns particles, and a
//! [`NotationSink`] that appends played notes to a scrolling staff strip.
//! Neither can fail the caller.

use crate::clock::Clock;
use crate::note::{Note, PitchClass};
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Receives key lighting and particle effects
pub trait VisualFeedback {
    /// Light or unlight the key for a sounding note
    fn set_key_active(&mut self, note: Note, active: bool);

    /// Mark a key as part of the highlighted scale
    fn set_key_highlighted(&mut self, note: Note, highlighted: bool);

    /// Spawn a particle burst above a key
    fn emit_particles(&mut self, note: Note);
}

/// Receives every attacked note for the notation strip
pub trait NotationSink {
    fn append_note(&mut self, note: Note);
}

/// Upper bound on live particles
pub const MAX_PARTICLES: usize = 100;
/// Particles spawned per attack
pub const PARTICLES_PER_BURST: usize = 8;
/// Particles spawned per stream pulse while a key stays lit
pub const PARTICLES_PER_PULSE: usize = 3;
/// Interval between stream pulses
pub const STREAM_INTERVAL: Duration = Duration::from_millis(300);
/// How long a particle stays visible
pub const PARTICLE_LIFETIME: Duration = Duration::from_secs(2);

/// A single rising spark above a key
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub note: Note,
    pub born: Instant,
    /// Horizontal drift in columns relative to the key centre
    pub drift: i8,
}

impl Particle {
    /// Age as a fraction of the lifetime (0.0 fresh, 1.0 gone)
    pub fn age(&self, now: Instant) -> f32 {
        let age = now.saturating_duration_since(self.born).as_secs_f32();
        (age / PARTICLE_LIFETIME.as_secs_f32()).min(1.0)
    }
}

/// Lit keys, scale highlights and particles, as drawn by the UI
pub struct KeyboardDisplay {
    clock: Rc<dyn Clock>,
    /// Lit keys and when each one next pulses
    active: HashMap<Note, Instant>,
    highlighted: HashSet<Note>,
    particles: VecDeque<Particle>,
    spawned: u32,
}

impl KeyboardDisplay {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            active: HashMap::new(),
            highlighted: HashSet::new(),
            particles: VecDeque::with_capacity(MAX_PARTICLES),
            spawned: 0,
        }
    }

    pub fn is_active(&self, note: Note) -> bool {
        self.active.contains_key(&note)
    }

    pub fn is_highlighted(&self, note: Note) -> bool {
        self.highlighted.contains(&note)
    }

    /// Lit keys in ascending pitch order
    pub fn active_notes(&self) -> Vec<Note> {
        let mut notes: Vec<_> = self.active.keys().copied().collect();
        notes.sort();
        notes
    }

    /// Drop expired particles and return the rest
    pub fn live_particles(&mut self) -> impl Iterator<Item = &Particle> {
        let now = self.clock.now();
        while let Some(front) = self.particles.front() {
            if now.saturating_duration_since(front.born) >= PARTICLE_LIFETIME {
                self.particles.pop_front();
            } else {
                break;
            }
        }
        self.particles.iter()
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    /// Pulse particles above every key that has stayed lit for another
    /// [`STREAM_INTERVAL`]. Returns the number of keys that pulsed.
    pub fn pulse_streams(&mut self) -> usize {
        let now = self.clock.now();
        let due: Vec<Note> = self
            .active
            .iter_mut()
            .filter(|(_, next)| **next <= now)
            .map(|(note, next)| {
                // a stalled loop skips missed pulses
                *next = now + STREAM_INTERVAL;
                *note
            })
            .collect();
        for &note in &due {
            self.spawn(note, PARTICLES_PER_PULSE);
        }
        due.len()
    }

    fn spawn(&mut self, note: Note, count: usize) {
        let born = self.clock.now();
        for _ in 0..count {
            if self.particles.len() >= MAX_PARTICLES {
                self.particles.pop_front();
            }
            // Cheap scatter: cycle through -2..=2 columns.
            let drift = (self.spawned.wrapping_mul(7) % 5) as i8 - 2;
            self.spawned = self.spawned.wrapping_add(1);
            self.particles.push_back(Particle { note, born, drift });
        }
    }
}

impl VisualFeedback for KeyboardDisplay {
    fn set_key_active(&mut self, note: Note, active: bool) {
        if active {
            let next = self.clock.now() + STREAM_INTERVAL;
            self.active.entry(note).or_insert(next);
        } else {
            self.active.remove(&note);
        }
    }

    fn set_key_highlighted(&mut self, note: Note, highlighted: bool) {
        if highlighted {
            self.highlighted.insert(note);
        } else {
            self.highlighted.remove(&note);
        }
    }

    fn emit_particles(&mut self, note: Note) {
        self.spawn(note, PARTICLES_PER_BURST);
    }
}

/// Notes kept on the notation strip
pub const MAX_NOTATION_NOTES: usize = 12;
/// Time after which a notated note is drawn faded
pub const NOTATION_FADE: Duration = Duration::from_secs(3);

/// Which staff a note is written on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staff {
    Treble,
    Bass,
}

/// Where a note sits on its staff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaffPlacement {
    pub staff: Staff,
    /// Diatonic steps below the top staff line (even = on a line, odd = in a space)
    pub steps_below_top: i32,
    /// Whether a ledger line is needed
    pub ledger: bool,
    /// Whether a sharp sign precedes the note
    pub sharp: bool,
}

/// Diatonic letter index (C=0 .. B=6) of a pitch class, sharps sharing their natural
fn letter_index(pc: PitchClass) -> i32 {
    match pc {
        PitchClass::C | PitchClass::CSharp => 0,
        PitchClass::D | PitchClass::DSharp => 1,
        PitchClass::E => 2,
        PitchClass::F | PitchClass::FSharp => 3,
        PitchClass::G | PitchClass::GSharp => 4,
        PitchClass::A | PitchClass::ASharp => 5,
        PitchClass::B => 6,
    }
}

/// Place a note on the grand staff. Middle C and above go on the treble staff.
pub fn staff_placement(note: Note) -> StaffPlacement {
    let diatonic = note.octave as i32 * 7 + letter_index(note.pitch_class);
    let (staff, top_line) = if note.octave >= 4 {
        (Staff::Treble, 5 * 7 + 3) // F5
    } else {
        (Staff::Bass, 3 * 7 + 5) // A3
    };
    let steps_below_top = top_line - diatonic;
    StaffPlacement {
        staff,
        steps_below_top,
        ledger: !(-1..=9).contains(&steps_below_top),
        sharp: note.pitch_class.is_sharp(),
    }
}

/// A note written on the strip
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NotatedNote {
    pub note: Note,
    pub placement: StaffPlacement,
    pub added: Instant,
}

impl NotatedNote {
    pub fn is_faded(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.added) >= NOTATION_FADE
    }
}

/// Scrolling strip of the most recently played notes
pub struct NotationStrip {
    clock: Rc<dyn Clock>,
    notes: VecDeque<NotatedNote>,
}

impl NotationStrip {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            notes: VecDeque::with_capacity(MAX_NOTATION_NOTES),
        }
    }

    /// Notes oldest first
    pub fn notes(&self) -> impl Iterator<Item = &NotatedNote> {
        self.notes.iter()
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn clear(&mut self) {
        self.notes.clear();
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }
}

impl NotationSink for NotationStrip {
    fn append_note(&mut self, note: Note) {
        if self.notes.len() >= MAX_NOTATION_NOTES {
            self.notes.pop_front();
        }
        self.notes.push_back(NotatedNote {
            note,
            placement: staff_placement(note),
            added: self.clock.now(),
        });
    }
}
