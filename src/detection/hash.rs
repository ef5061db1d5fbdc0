/// Jenkins lookup3 mixing used for option and subtree hashes.
///
/// Hashes must be stable across runs and independent of allocation
/// addresses, so this is a plain deterministic function rather than a
/// seeded hasher.

#[inline]
pub fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(4);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(6);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(8);
    *b = b.wrapping_add(*a);
    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(16);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(19);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(4);
    *b = b.wrapping_add(*a);
}

#[inline]
pub fn finalize(a: &mut u32, b: &mut u32, c: &mut u32) {
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(14));
    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(11));
    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(25));
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(16));
    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(4));
    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(14));
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(24));
}

/// Folds a stream of words into a 32-bit hash, three words per mix round
#[derive(Debug, Clone)]
pub struct WordHasher {
    a: u32,
    b: u32,
    c: u32,
    pending: usize,
}

impl WordHasher {
    pub fn new(seed: u32) -> Self {
        Self {
            a: seed,
            b: 0,
            c: 0,
            pending: 1,
        }
    }

    pub fn word(&mut self, word: u32) -> &mut Self {
        match self.pending {
            0 => self.a = self.a.wrapping_add(word),
            1 => self.b = self.b.wrapping_add(word),
            _ => self.c = self.c.wrapping_add(word),
        }
        self.pending += 1;
        if self.pending == 3 {
            mix(&mut self.a, &mut self.b, &mut self.c);
            self.pending = 0;
        }
        self
    }

    pub fn flag(&mut self, value: bool) -> &mut Self {
        self.word(u32::from(value))
    }

    pub fn wide(&mut self, value: u64) -> &mut Self {
        self.word(value as u32).word((value >> 32) as u32)
    }

    pub fn opt(&mut self, value: Option<i64>) -> &mut Self {
        match value {
            Some(v) => self.word(1).wide(v as u64),
            None => self.word(0),
        }
    }

    /// Length-prefixed bytes, packed little-endian
    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.word(bytes.len() as u32);
        for chunk in bytes.chunks(4) {
            let mut buf = [0u8; 4];
            buf[..chunk.len()].copy_from_slice(chunk);
            self.word(u32::from_le_bytes(buf));
        }
        self
    }

    pub fn finish(&self) -> u32 {
        let (mut a, mut b, mut c) = (self.a, self.b, self.c);
        finalize(&mut a, &mut b, &mut c);
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_hasher_is_deterministic() {
        let h1 = WordHasher::new(7).bytes(b"GET /index").word(3).finish();
        let h2 = WordHasher::new(7).bytes(b"GET /index").word(3).finish();
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_word_hasher_is_order_sensitive() {
        let h1 = WordHasher::new(0).word(1).word(2).finish();
        let h2 = WordHasher::new(0).word(2).word(1).finish();
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_bytes_are_length_prefixed() {
        let h1 = WordHasher::new(0).bytes(b"ab").bytes(b"c").finish();
        let h2 = WordHasher::new(0).bytes(b"a").bytes(b"bc").finish();
        assert_ne!(h1, h2);
    }
}
