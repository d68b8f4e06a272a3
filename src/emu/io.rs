//! The `IN` / `OUT` capability interfaces, and their standard implementations.

use std::{
    collections::VecDeque,
    io::{self, BufRead},
};

/// Where `IN` reads its numbers from.
pub trait InputSource {
    /// Returns the next whitespace-delimited token, or `Ok(None)` at end of input.
    fn next_token(&mut self) -> io::Result<Option<String>>;
}

/// Where `OUT` delivers its formatted lines.
pub trait OutputSink {
    fn emit(&mut self, text: &str);
}

/// Splits any buffered reader into whitespace- and newline-delimited tokens.
#[derive(Debug)]
pub struct ReaderSource<R> {
    reader: R,
    pending: VecDeque<String>,
}

impl<R: BufRead> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: VecDeque::new(),
        }
    }
}

/// Pops the next buffered token, refilling the buffer one line at a time.
fn next_buffered(
    pending: &mut VecDeque<String>,
    mut read_line: impl FnMut(&mut String) -> io::Result<usize>,
) -> io::Result<Option<String>> {
    loop {
        if let Some(token) = pending.pop_front() {
            return Ok(Some(token));
        }
        let mut line = String::new();
        if read_line(&mut line)? == 0 {
            return Ok(None);
        }
        pending.extend(line.split_whitespace().map(str::to_owned));
    }
}

impl<R: BufRead> InputSource for ReaderSource<R> {
    fn next_token(&mut self) -> io::Result<Option<String>> {
        next_buffered(&mut self.pending, |line| self.reader.read_line(line))
    }
}

/// Reads tokens from standard input.
///
/// Stdin is only locked for the duration of each line read, so the debugger's line editor can
/// read from it too.
#[derive(Debug)]
pub struct StdinSource {
    stdin: io::Stdin,
    pending: VecDeque<String>,
}

impl StdinSource {
    pub fn stdin() -> Self {
        Self {
            stdin: io::stdin(),
            pending: VecDeque::new(),
        }
    }
}

impl InputSource for StdinSource {
    fn next_token(&mut self) -> io::Result<Option<String>> {
        next_buffered(&mut self.pending, |line| self.stdin.read_line(line))
    }
}

impl<T: InputSource + ?Sized> InputSource for &mut T {
    fn next_token(&mut self) -> io::Result<Option<String>> {
        (**self).next_token()
    }
}

/// Prints every line to standard output.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn emit(&mut self, text: &str) {
        println!("{text}");
    }
}

/// Collects every line, for tests.
impl OutputSink for Vec<String> {
    fn emit(&mut self, text: &str) {
        self.push(text.to_owned());
    }
}

impl<T: OutputSink + ?Sized> OutputSink for &mut T {
    fn emit(&mut self, text: &str) {
        (**self).emit(text);
    }
}
