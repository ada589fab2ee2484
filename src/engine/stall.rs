use crate::sensor::Fingerprint;

/// Compares each fingerprint with the one immediately before it only, so
/// short cycles (turning in place) are left to the iteration ceiling.
#[derive(Clone, Debug)]
pub struct StallDetector {
    last: Option<Fingerprint>,
    repeats: u32,
    limit: u32,
}

impl StallDetector {
    pub fn new(limit: u32) -> Self {
        Self {
            last: None,
            repeats: 0,
            limit,
        }
    }

    pub fn clear(&mut self) {
        self.last = None;
        self.repeats = 0;
    }

    pub fn observe(&mut self, fingerprint: Fingerprint) -> bool {
        if self.last == Some(fingerprint) {
            self.repeats += 1;
        } else {
            self.repeats = 0;
            self.last = Some(fingerprint);
        }
        self.repeats > self.limit
    }

    pub fn repeats(&self) -> u32 {
        self.repeats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Heading, Pose};

    fn fp(heading: Heading) -> Fingerprint {
        Fingerprint {
            pose: Pose::new(1, 1, heading),
            ahead: true,
            left: false,
            right: false,
        }
    }

    #[test]
    fn trips_only_after_limit_is_exceeded() {
        let mut detector = StallDetector::new(2);
        assert!(!detector.observe(fp(Heading::North)));
        assert!(!detector.observe(fp(Heading::North)));
        assert!(!detector.observe(fp(Heading::North)));
        assert!(detector.observe(fp(Heading::North)));
    }

    #[test]
    fn any_change_resets_the_streak() {
        let mut detector = StallDetector::new(1);
        detector.observe(fp(Heading::North));
        detector.observe(fp(Heading::North));
        assert_eq!(detector.repeats(), 1);
        assert!(!detector.observe(fp(Heading::East)));
        assert_eq!(detector.repeats(), 0);
    }

    #[test]
    fn four_cycle_never_trips() {
        let mut detector = StallDetector::new(0);
        for step in 0..400u32 {
            assert!(!detector.observe(fp(Heading::from_index((step % 4) as u8))));
        }
    }
}
