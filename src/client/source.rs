//! Operation sources
//!
//! Anything that can feed a `Client` a sequence of operations: interactive
//! lines, a fixed list, or the benchmark driver's generated workload.

use std::io::BufRead;

use crate::error::Result;
use crate::protocol::{parse_line, Operation};

/// A lazy, possibly endless, sequence of operations
pub trait OperationSource {
    /// Next operation, `Some(Err(..))` for input that could not be
    /// turned into one, `None` once exhausted
    fn next_operation(&mut self) -> Option<Result<Operation>>;
}

/// Reads one operation per line (see `protocol::parse_line`)
pub struct LineSource<R> {
    reader: R,
    line: String,
    exhausted: bool,
}

impl<R: BufRead> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            exhausted: false,
        }
    }
}

impl<R: BufRead> OperationSource for LineSource<R> {
    fn next_operation(&mut self) -> Option<Result<Operation>> {
        while !self.exhausted {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => self.exhausted = true,
                Ok(_) => match parse_line(&self.line) {
                    Ok(Some(operation)) => return Some(Ok(operation)),
                    Ok(None) => continue,
                    Err(e) => return Some(Err(e)),
                },
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e.into()));
                }
            }
        }
        None
    }
}

/// Adapts any iterator of operations
pub struct IterSource<I> {
    iter: I,
}

impl<I: Iterator<Item = Operation>> IterSource<I> {
    pub fn new(iter: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            iter: iter.into_iter(),
        }
    }
}

impl<I: Iterator<Item = Operation>> OperationSource for IterSource<I> {
    fn next_operation(&mut self) -> Option<Result<Operation>> {
        self.iter.next().map(Ok)
    }
}
