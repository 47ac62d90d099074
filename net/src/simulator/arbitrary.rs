use super::Options;

impl quickcheck::Arbitrary for Options {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        Self {
            seed: u64::arbitrary(g),
            shuffle: bool::arbitrary(g),
        }
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        if !self.shuffle {
            return Box::new(std::iter::empty());
        }
        Box::new(std::iter::once(Self {
            seed: self.seed,
            shuffle: false,
        }))
    }
}
