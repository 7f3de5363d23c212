// Module representing the core data types that the engine
// needs: the byte buffer substrate for a single test run.

use std::cmp::Reverse;

// Half-open span [u, v) of the buffer consumed coherently by
// one decoder invocation.
pub type Interval = (usize, usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopTest;

// Status indicates the result that we got from completing
// a single test execution. The declaration order is the total
// order the engine's transition rule compares by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    // The test tried to read more data than we had for it.
    Overrun,

    // Some important precondition of the test was not
    // satisfied.
    Invalid,

    // This test ran successfully to completion without
    // anything of note happening.
    Valid,

    // This was an interesting test execution! (Usually this
    // means failing, but for things like find it may not.)
    Interesting,
}

// One run's consumption log. A test function takes a TestData,
// uses it to produce a value, and the TestData records what was
// read and how the run ended. The engine freezes it at the run
// boundary; after that it is immutable.
#[derive(Debug, Clone)]
pub struct TestData {
    buffer: Vec<u8>,
    index: usize,
    status: Status,
    frozen: bool,
    intervals: Vec<Interval>,
    interval_stack: Vec<usize>,
    cost: u64,
}

impl TestData {
    pub fn new(buffer: Vec<u8>) -> TestData {
        TestData {
            buffer,
            index: 0,
            status: Status::Valid,
            frozen: false,
            intervals: Vec::new(),
            interval_stack: Vec::new(),
            cost: 0,
        }
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    // Count of bytes consumed so far. May exceed the buffer
    // length by the size of the draw that overran.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn cost(&self) -> u64 {
        self.cost
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn frozen(&self) -> bool {
        self.frozen
    }

    pub fn rejected(&self) -> bool {
        self.status == Status::Invalid || self.status == Status::Overrun
    }

    fn assert_not_frozen(&self, name: &str) {
        assert!(!self.frozen, "Cannot call {} on frozen TestData", name);
    }

    // Reads n bytes starting at the current index. Overrunning
    // the buffer flips the status to Overrun, freezes the run
    // and raises the stop sentinel.
    pub fn draw_bytes(&mut self, n: usize) -> Result<Vec<u8>, StopTest> {
        self.assert_not_frozen("draw_bytes");
        self.index += n;
        if self.index > self.buffer.len() {
            self.status = Status::Overrun;
            self.freeze();
            return Err(StopTest);
        }
        self.intervals.push((self.index - n, self.index));
        Ok(self.buffer[self.index - n..self.index].to_vec())
    }

    pub fn start_example(&mut self) {
        self.assert_not_frozen("start_example");
        self.interval_stack.push(self.index);
    }

    pub fn stop_example(&mut self) {
        self.assert_not_frozen("stop_example");
        let k = self
            .interval_stack
            .pop()
            .expect("stop_example without matching start_example");
        if k != self.index {
            let t = (k, self.index);
            if self.intervals.last() != Some(&t) {
                self.intervals.push(t);
            }
        }
    }

    // Extra penalty a decoder may accrue to steer shrinking
    // away from values it considers worse.
    pub fn incur_cost(&mut self, cost: u64) {
        self.assert_not_frozen("incur_cost");
        self.cost += cost;
    }

    // Always returns the stop sentinel so the test function can
    // end the run with `?`.
    pub fn mark_interesting(&mut self) -> Result<(), StopTest> {
        self.assert_not_frozen("mark_interesting");
        if self.status == Status::Valid {
            self.status = Status::Interesting;
        }
        Err(StopTest)
    }

    pub fn mark_invalid(&mut self) -> Result<(), StopTest> {
        self.assert_not_frozen("mark_invalid");
        if self.status != Status::Overrun {
            self.status = Status::Invalid;
        }
        Err(StopTest)
    }

    // Idempotent. Intervals are sorted as longest first, then by
    // interval start; interesting runs keep only the consumed
    // prefix so trailing unread bytes never get shrunk.
    pub fn freeze(&mut self) {
        if self.frozen {
            return;
        }
        self.frozen = true;
        self.intervals.sort_by_key(|&(u, v)| (Reverse(v - u), u));
        if self.status == Status::Interesting {
            self.buffer.truncate(self.index);
        }
    }
}
