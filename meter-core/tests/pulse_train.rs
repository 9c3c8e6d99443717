use meter_core::counter::{PulseSampler, PulseTally, UNIT_VOLUME, UsageCounter};
use meter_core::debounce::{DEFAULT_WINDOW_TICKS, Edge, Level, PulseDebouncer};

/// Small deterministic generator so the bounce patterns are reproducible.
struct Lcg(u32);

impl Lcg {
    fn next_u32(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        self.0 >> 16
    }

    fn below(&mut self, bound: u32) -> u32 {
        self.next_u32() % bound
    }
}

/// Builds one reed closure: contact bounce, a solid low, bounce on release
/// and a solid high.
fn closure(rng: &mut Lcg, window: usize, samples: &mut Vec<Level>) {
    let bounces = rng.below(6) as usize;
    for i in 0..bounces * 2 {
        samples.push(Level::from_high(i % 2 == 1));
    }
    let low = window + 5 + rng.below(200) as usize;
    samples.extend(std::iter::repeat_n(Level::Low, low));

    let bounces = rng.below(6) as usize;
    for i in 0..bounces * 2 {
        samples.push(Level::from_high(i % 2 == 0));
    }
    let high = window + 5 + rng.below(400) as usize;
    samples.extend(std::iter::repeat_n(Level::High, high));
}

#[test]
fn bouncy_closures_each_count_once() {
    let window = usize::from(DEFAULT_WINDOW_TICKS);
    let mut rng = Lcg(0x5eed);
    let mut samples = Vec::new();
    samples.extend(std::iter::repeat_n(Level::High, 50));
    for _ in 0..250 {
        closure(&mut rng, window, &mut samples);
    }

    let tally = PulseTally::new();
    let mut sampler = PulseSampler::new(PulseDebouncer::default(), &tally);
    let mut rising = 0;
    for level in samples {
        if sampler.tick(level) == Some(Edge::Rising) {
            rising += 1;
        }
    }

    assert_eq!(tally.pulses(), 250);
    assert_eq!(rising, 250);

    let mut counter = UsageCounter::new(&tally);
    counter.seed_offset(1_000);
    assert_eq!(counter.current_reading(), 1_000 + 250 * UNIT_VOLUME);
}

#[test]
fn glitches_shorter_than_window_never_count() {
    let mut rng = Lcg(42);
    let tally = PulseTally::new();
    let mut sampler = PulseSampler::new(PulseDebouncer::new(20, Level::High), &tally);

    for _ in 0..500 {
        // Dropout shorter than the window, then long enough high to settle.
        let dropout = 1 + rng.below(15);
        for _ in 0..dropout {
            sampler.tick(Level::Low);
        }
        for _ in 0..25 {
            sampler.tick(Level::High);
        }
    }

    assert_eq!(tally.pulses(), 0);
    assert_eq!(sampler.debouncer().settled_level(), Level::High);
}

#[test]
fn stable_levels_at_window_length_are_counted() {
    const WINDOW: u16 = 10;
    let tally = PulseTally::new();
    let mut sampler = PulseSampler::new(PulseDebouncer::new(WINDOW, Level::High), &tally);

    for _ in 0..100 {
        // A low held for exactly the window, then a high spanning the
        // falling edge's holdoff, the rising edge's window and its holdoff.
        for _ in 0..WINDOW {
            sampler.tick(Level::Low);
        }
        for _ in 0..WINDOW + 2 {
            sampler.tick(Level::High);
        }
    }

    assert_eq!(tally.pulses(), 100);
}
