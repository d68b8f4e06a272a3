use crate::plat::MEM_WORDS;

use super::Fault;

/// Word-addressed data memory. Separate from the program, which the emulator holds on its own.
pub struct Ram {
    pub memory: Box<[u16]>,
}

impl Ram {
    /// Creates a new [`Ram`] instance, allocating and initializing its memory to [0u16; 65536].
    pub fn new() -> Self {
        Self {
            memory: vec![0u16; MEM_WORDS].into_boxed_slice(),
        }
    }

    fn index(addr: i32) -> Result<usize, Fault> {
        usize::try_from(addr)
            .ok()
            .filter(|&i| i < MEM_WORDS)
            .ok_or(Fault::MemoryOutOfBounds(addr))
    }

    /// Reads the word at `addr`.
    ///
    /// # Errors
    ///
    /// Faults with [`Fault::MemoryOutOfBounds`] if `addr` is outside `0..=65535`.
    pub fn read(&self, addr: i32) -> Result<u16, Fault> {
        Ok(self.memory[Self::index(addr)?])
    }

    /// Writes `value` to the word at `addr`.
    ///
    /// # Errors
    ///
    /// Faults with [`Fault::MemoryOutOfBounds`] if `addr` is outside `0..=65535`.
    pub fn write(&mut self, addr: i32, value: u16) -> Result<(), Fault> {
        self.memory[Self::index(addr)?] = value;
        Ok(())
    }
}

impl Default for Ram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        let mut ram = Ram::new();
        assert_eq!(ram.memory.len(), 65536);
        ram.write(0, 1).unwrap();
        ram.write(65535, 2).unwrap();
        assert_eq!(ram.read(0), Ok(1));
        assert_eq!(ram.read(65535), Ok(2));
        assert_eq!(ram.read(65536), Err(Fault::MemoryOutOfBounds(65536)));
        assert_eq!(ram.write(-1, 3), Err(Fault::MemoryOutOfBounds(-1)));
        assert!(ram.memory.iter().skip(1).take(65534).all(|&w| w == 0));
    }
}
