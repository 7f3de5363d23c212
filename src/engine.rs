// Core module that provides the main search loop: generate
// candidate buffers, keep the best run seen so far under the
// status-monotone transition rule, then shrink it until the
// pass battery quiesces or the shrink budget runs out.

use rand::{ChaChaRng, Rng, SeedableRng};

use std::cmp::min;

use crate::data::{Status, StopTest, TestData};

#[derive(Debug, Clone)]
pub struct Settings {
    pub buffer_size: usize,
    pub mutations: u64,
    pub generations: u64,
    pub max_shrinks: u64,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            buffer_size: 8 * 1024,
            mutations: 50,
            generations: 100,
            max_shrinks: 2000,
        }
    }
}

// Raised (as an error value) once max_shrinks accepted shrinks
// have happened; caught in run and nowhere else.
#[derive(Debug, Clone)]
struct StopShrinking;

type StepResult = Result<(), StopShrinking>;

// The lexicographic metric the shrink phase drives downwards.
// Each accepted interesting-to-interesting transition strictly
// decreases it, which is what makes the pass battery terminate.
fn interest_key(data: &TestData) -> (u64, usize, usize, &[u8]) {
    (
        data.cost(),
        data.intervals().len(),
        data.buffer().len(),
        data.buffer(),
    )
}

pub struct TestRunner<F> {
    test_function: F,
    pub settings: Settings,
    last_data: TestData,
    changed: u64,
    shrinks: u64,
    random: ChaChaRng,
}

impl<F> TestRunner<F>
where
    F: FnMut(&mut TestData) -> Result<(), StopTest>,
{
    pub fn new(test_function: F, settings: Settings, seed: &[u32]) -> TestRunner<F> {
        TestRunner {
            test_function,
            settings,
            // Placeholder; replaced by the first seed buffer
            // before any transition is considered.
            last_data: TestData::new(Vec::new()),
            changed: 0,
            shrinks: 0,
            random: ChaChaRng::from_seed(seed),
        }
    }

    pub fn last_data(&self) -> &TestData {
        &self.last_data
    }

    pub fn changed(&self) -> u64 {
        self.changed
    }

    pub fn shrinks(&self) -> u64 {
        self.shrinks
    }

    pub fn run(&mut self) {
        // StopShrinking is the clean exit from the shrink
        // phase; everything else runs to completion.
        let _ = self.loop_body();
    }

    fn rand_bytes(&mut self, n: usize) -> Vec<u8> {
        let mut result = vec![0; n];
        self.random.fill_bytes(&mut result);
        result
    }

    // One full test run: the stop sentinel from overrun or a
    // mark call is absorbed here, at the run boundary.
    fn execute(&mut self, buffer: Vec<u8>) -> TestData {
        let mut data = TestData::new(buffer);
        let _ = (self.test_function)(&mut data);
        data.freeze();
        data
    }

    fn new_buffer(&mut self) {
        let buffer = self.rand_bytes(self.settings.buffer_size);
        self.last_data = self.execute(buffer);
    }

    // Transition rules:
    //   1. A transition cannot decrease the status.
    //   2. Any transition which increases the status is valid.
    //   3. If the previous status was interesting, only
    //      shrinking transitions are allowed.
    fn consider_new_test_data(&self, data: &TestData) -> bool {
        if self.last_data.status() < data.status() {
            return true;
        }
        if self.last_data.status() > data.status() {
            return false;
        }
        match data.status() {
            // Prefer invalid runs that got further before they
            // were rejected: they retain more shrinking signal.
            Status::Invalid => data.index() >= self.last_data.index(),
            // Prefer overruns that overran less.
            Status::Overrun => data.index() <= self.last_data.index(),
            Status::Interesting => {
                assert!(data.buffer().len() <= self.last_data.buffer().len());
                if data.buffer().len() == self.last_data.buffer().len() {
                    assert!(data.buffer() < self.last_data.buffer());
                }
                interest_key(data) < interest_key(&self.last_data)
            }
            Status::Valid => true,
        }
    }

    fn incorporate_new_buffer(&mut self, buffer: Vec<u8>) -> Result<bool, StopShrinking> {
        // A decoder is a pure function of the bytes it reads,
        // so a candidate that agrees with the best buffer on
        // the whole consumed prefix cannot change the outcome.
        let index = self.last_data.index();
        let last_buffer = self.last_data.buffer();
        if buffer[..min(index, buffer.len())] == last_buffer[..min(index, last_buffer.len())] {
            return Ok(false);
        }
        let data = self.execute(buffer);
        if self.consider_new_test_data(&data) {
            if self.last_data.status() == Status::Interesting {
                self.shrinks += 1;
            }
            self.changed += 1;
            self.last_data = data;
            if self.shrinks >= self.settings.max_shrinks {
                return Err(StopShrinking);
            }
            return Ok(true);
        }
        Ok(false)
    }

    fn loop_body(&mut self) -> StepResult {
        self.new_buffer();
        let mut mutations = 0;
        let mut generation = 0;
        while self.last_data.status() != Status::Interesting {
            if mutations >= self.settings.mutations {
                generation += 1;
                if generation >= self.settings.generations {
                    return Ok(());
                }
                mutations = 0;
                self.new_buffer();
            } else {
                let candidate = self.mutate_data_to_new_buffer();
                self.incorporate_new_buffer(candidate)?;
            }
            mutations += 1;
        }
        self.shrink()
    }

    fn mutate_data_to_new_buffer(&mut self) -> Vec<u8> {
        let n = min(self.last_data.buffer().len(), self.last_data.index());
        if n == 0 {
            return Vec::new();
        }
        if n == 1 {
            return self.rand_bytes(1);
        }

        if self.last_data.status() == Status::Overrun {
            // The run wanted more data than it had, so pull
            // every byte down towards zero rather than splicing.
            let mut result = self.last_data.buffer().to_vec();
            for i in 0..result.len() {
                match self.random.gen_range(0, 3) {
                    0 => result[i] = 0,
                    1 => {
                        let c = u32::from(result[i]);
                        result[i] = self.random.gen_range(0, c + 1) as u8;
                    }
                    _ => (),
                }
            }
            return result;
        }

        let probe = self.rand_bytes(1)[0];
        let n_intervals = self.last_data.intervals().len();
        if probe <= 100 || n_intervals <= 1 {
            let index = self.last_data.index();
            let (u, v) = if self.random.gen::<bool>() || n_intervals <= 1 {
                let u = self.random.gen_range(0, index - 1);
                let v = u + 1 + self.random.gen_range(0, index - 1 - u);
                (u, v)
            } else {
                self.last_data.intervals()[self.random.gen_range(0, n_intervals)]
            };
            let replacement = match self.random.gen_range(0, 3) {
                0 => vec![0; v - u],
                1 => vec![0xff; v - u],
                _ => self.rand_bytes(v - u),
            };
            let buffer = self.last_data.buffer();
            let mut result = Vec::with_capacity(buffer.len());
            result.extend_from_slice(&buffer[..u]);
            result.extend_from_slice(&replacement);
            result.extend_from_slice(&buffer[v..]);
            result
        } else {
            // Cross-splice: overwrite one recorded interval
            // with the bytes of a later one, shifting the tail.
            loop {
                let i = self.random.gen_range(0, n_intervals - 1);
                let j = self.random.gen_range(i + 1, n_intervals);
                let (u1, v1) = self.last_data.intervals()[i];
                let (u2, v2) = self.last_data.intervals()[j];
                if (u1, v1) == (u2, v2) {
                    continue;
                }
                let buffer = self.last_data.buffer();
                let mut result = Vec::with_capacity(u1 + (v2 - u2) + (buffer.len() - v1));
                result.extend_from_slice(&buffer[..u1]);
                result.extend_from_slice(&buffer[u2..v2]);
                result.extend_from_slice(&buffer[v1..]);
                return result;
            }
        }
    }

    // One outer sweep runs the whole battery; the cheap passes
    // get retried before the expensive ones are even attempted,
    // and any progress at all restarts the sweep.
    fn shrink(&mut self) -> StepResult {
        let initial_changes = self.changed;
        loop {
            assert!(self.last_data.status() == Status::Interesting);
            let change_counter = self.changed;

            self.delete_intervals()?;
            self.sort_intervals()?;
            self.zero_blocks()?;
            self.minimize_individual_bytes()?;
            self.reorder_adjacent_bytes()?;
            if self.changed == change_counter {
                self.delete_with_borrow()?;
            }
            if self.changed == change_counter {
                self.minimize_duplicated_bytes()?;
            }
            if self.changed == change_counter {
                self.reorder_bytes()?;
            }

            if self.changed == change_counter {
                return Ok(());
            }
            if self.changed > initial_changes + self.settings.max_shrinks {
                return Ok(());
            }
        }
    }

    // Attempt to delete each recorded interval's span, longest
    // first. An accepted deletion does not advance the cursor,
    // so whatever interval lands in that slot is attempted
    // next. Runs to fixpoint.
    fn delete_intervals(&mut self) -> StepResult {
        loop {
            let change_counter = self.changed;
            let mut i = 0;
            while i < self.last_data.intervals().len() {
                let (u, v) = self.last_data.intervals()[i];
                let buffer = self.last_data.buffer();
                let mut attempt = Vec::with_capacity(buffer.len() - (v - u));
                attempt.extend_from_slice(&buffer[..u]);
                attempt.extend_from_slice(&buffer[v..]);
                if !self.incorporate_new_buffer(attempt)? {
                    i += 1;
                }
            }
            if self.changed == change_counter {
                return Ok(());
            }
        }
    }

    // Replace each interval's span with its bytes sorted
    // ascending, the lexicographically smallest arrangement.
    fn sort_intervals(&mut self) -> StepResult {
        let mut i = 0;
        while i < self.last_data.intervals().len() {
            let (u, v) = self.last_data.intervals()[i];
            let mut attempt = self.last_data.buffer().to_vec();
            attempt[u..v].sort();
            self.incorporate_new_buffer(attempt)?;
            i += 1;
        }
        Ok(())
    }

    fn zero_blocks(&mut self) -> StepResult {
        let k = 8;
        let end = self.last_data.buffer().len().saturating_sub(k);
        for i in 0..end {
            let buffer = self.last_data.buffer();
            if i + k > buffer.len() {
                break;
            }
            let mut attempt = buffer.to_vec();
            for b in &mut attempt[i..i + k] {
                *b = 0;
            }
            self.incorporate_new_buffer(attempt)?;
        }
        Ok(())
    }

    // Per byte: try deleting it outright, then each smaller
    // value in ascending order, either alone or with a fresh
    // random tail. The resampled tail is what lets us escape
    // minima where a later byte constrains this one.
    fn minimize_individual_bytes(&mut self) -> StepResult {
        let mut i = 0;
        while i < self.last_data.buffer().len() {
            let buffer = self.last_data.buffer().to_vec();
            let mut deleted = buffer.clone();
            deleted.remove(i);
            if !self.incorporate_new_buffer(deleted)? {
                for c in 0..buffer[i] {
                    let mut substituted = buffer.clone();
                    substituted[i] = c;
                    if self.incorporate_new_buffer(substituted)? {
                        break;
                    }
                    let mut resampled = buffer[..i].to_vec();
                    resampled.push(c);
                    let tail = self.rand_bytes(buffer.len() - i - 1);
                    resampled.extend_from_slice(&tail);
                    if self.incorporate_new_buffer(resampled)? {
                        break;
                    }
                }
            }
            i += 1;
        }
        Ok(())
    }

    fn reorder_adjacent_bytes(&mut self) -> StepResult {
        let mut i = 0;
        while i + 1 < self.last_data.buffer().len() {
            let buffer = self.last_data.buffer();
            if buffer[i] > buffer[i + 1] {
                let mut attempt = buffer.to_vec();
                attempt.swap(i, i + 1);
                self.incorporate_new_buffer(attempt)?;
            }
            i += 1;
        }
        Ok(())
    }

    // Try deleting each byte; when deletion of a zero byte is
    // denied, borrow from the left instead: decrement the first
    // nonzero byte leftwards and saturate everything it skipped.
    fn delete_with_borrow(&mut self) -> StepResult {
        let mut i = 0;
        while i < self.last_data.buffer().len() {
            let buffer = self.last_data.buffer().to_vec();
            let mut deleted = buffer.clone();
            deleted.remove(i);
            if !self.incorporate_new_buffer(deleted)? && buffer[i] == 0 {
                let mut attempt = buffer;
                let mut j = i + 1;
                while j > 0 {
                    j -= 1;
                    if attempt[j] > 0 {
                        attempt[j] -= 1;
                        self.incorporate_new_buffer(attempt)?;
                        break;
                    }
                    attempt[j] = 255;
                }
            }
            i += 1;
        }
        Ok(())
    }

    // Bytes that share a value often encode the same drawn
    // value, so lowering them only works in lockstep. For each
    // such pair, try a coupled borrow (both zero) or a coupled
    // decrement, sweeping further down after a success.
    fn minimize_duplicated_bytes(&mut self) -> StepResult {
        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); 256];
        for (i, &c) in self.last_data.buffer().iter().enumerate() {
            buckets[usize::from(c)].push(i);
        }
        let mut indices = Vec::new();
        for bucket in &buckets {
            if bucket.len() > 1 {
                for &j in bucket {
                    for &k in bucket {
                        if j < k {
                            indices.push((j, k));
                        }
                    }
                }
            }
        }
        for (j, k) in indices {
            let buffer = self.last_data.buffer();
            if k >= buffer.len() || buffer[j] != buffer[k] {
                continue;
            }
            let c = buffer[j];
            if c == 0 {
                if j > 0 && buffer[j - 1] > 0 && buffer[k - 1] > 0 {
                    let mut attempt = buffer.to_vec();
                    attempt[j - 1] -= 1;
                    attempt[j] = 255;
                    attempt[k - 1] -= 1;
                    attempt[k] = 255;
                    self.incorporate_new_buffer(attempt)?;
                }
            } else {
                let mut attempt = buffer.to_vec();
                attempt[j] = c - 1;
                attempt[k] = c - 1;
                if self.incorporate_new_buffer(attempt)? {
                    for d in 0..c - 1 {
                        let buffer = self.last_data.buffer();
                        if k >= buffer.len() {
                            break;
                        }
                        let mut attempt = buffer.to_vec();
                        attempt[j] = d;
                        attempt[k] = d;
                        if self.incorporate_new_buffer(attempt)? {
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // Forward scan over all pairs: move smaller bytes earlier,
    // and decrement unequal positive pairs together.
    fn reorder_bytes(&mut self) -> StepResult {
        let outer = self.last_data.buffer().len();
        for j in 0..outer {
            let buffer = self.last_data.buffer();
            if j >= buffer.len() {
                break;
            }
            if buffer[j] == 0 {
                continue;
            }
            let inner = buffer.len();
            for k in j + 1..inner {
                let buffer = self.last_data.buffer();
                if k >= buffer.len() {
                    break;
                }
                if buffer[j] > buffer[k] {
                    let mut attempt = buffer.to_vec();
                    attempt.swap(j, k);
                    self.incorporate_new_buffer(attempt)?;
                }
                let buffer = self.last_data.buffer();
                if k >= buffer.len() {
                    break;
                }
                if buffer[j] > 0 && buffer[k] > 0 && buffer[j] != buffer[k] {
                    let mut attempt = buffer.to_vec();
                    attempt[j] -= 1;
                    attempt[k] -= 1;
                    self.incorporate_new_buffer(attempt)?;
                }
            }
        }
        Ok(())
    }
}

// Runs the search to completion and hands back the minimal
// interesting buffer, if one was found at all.
pub fn find_interesting_buffer<F>(
    test_function: F,
    settings: Settings,
    seed: &[u32],
) -> Option<Vec<u8>>
where
    F: FnMut(&mut TestData) -> Result<(), StopTest>,
{
    let mut runner = TestRunner::new(test_function, settings, seed);
    runner.run();
    if runner.last_data().status() == Status::Interesting {
        Some(runner.last_data().buffer().to_vec())
    } else {
        None
    }
}
