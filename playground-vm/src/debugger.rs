use std::str::FromStr;

use arbitrary::Arbitrary;
use isa::program::Program;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::error::DebugError;
use crate::error::ExecutionError;
use crate::error::PlaygroundError;
use crate::io::Inputs;
use crate::vm::VMState;

type Result<T> = std::result::Result<T, DebugError>;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, Arbitrary,
)]
pub enum DebugCommand {
    RewindAll,
    Rewind(u64),
    Play(u64),
    PlayAll,
    PrintState,
    PrintStack,
    PrintMemory,
    PrintMemoryAddress(u64),
    Clock,
}

impl FromStr for DebugCommand {
    type Err = DebugError;

    /// Parses the commands of the interactive debugger, like `play 3`,
    /// `rewind`, or `mem 12`.
    fn from_str(s: &str) -> Result<Self> {
        let unknown = || DebugError::UnknownCommand(s.trim().to_string());
        let mut words = s.split_whitespace();
        let command = words.next().ok_or_else(unknown)?;
        let argument = words.next().map(str::parse::<u64>).transpose().map_err(|_| unknown())?;
        if words.next().is_some() {
            return Err(unknown());
        }

        let command = match (command, argument) {
            ("play", None) => Self::PlayAll,
            ("play", Some(n)) => Self::Play(n),
            ("step", None) => Self::Play(1),
            ("rewind", None) => Self::RewindAll,
            ("rewind", Some(n)) => Self::Rewind(n),
            ("back", None) => Self::Rewind(1),
            ("state", None) => Self::PrintState,
            ("stack", None) => Self::PrintStack,
            ("mem", None) => Self::PrintMemory,
            ("mem", Some(address)) => Self::PrintMemoryAddress(address),
            ("clk", None) => Self::Clock,
            _ => return Err(unknown()),
        };
        Ok(command)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub address: u64,
    pub word: [u64; 4],
}

/// A snapshot of the machine at the debug cursor.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct DebugState {
    pub clk: u32,

    /// The next instruction to execute, including its argument. `None` once
    /// the program has halted.
    pub instruction: Option<String>,

    /// The mnemonic of the next instruction.
    pub op: Option<String>,

    /// The address of the next instruction.
    pub operation_index: Option<usize>,

    pub num_of_operations: Option<usize>,

    pub memory: Vec<MemoryEntry>,

    /// The entire operand stack, top first.
    pub stack: Vec<u64>,

    /// The error that terminated the session, if any.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum DebugOutput {
    State(DebugState),
    Stack(Vec<u64>),
    Memory(Vec<MemoryEntry>),
    MemoryEntry(MemoryEntry),
    Clock(u32),
}

/// The number of steps between two snapshots when a session starts.
pub const INITIAL_SNAPSHOT_INTERVAL: usize = 64;

/// The number of snapshots retained at most. Once reached, every other
/// snapshot is dropped and the interval doubles.
pub const MAX_NUM_SNAPSHOTS: usize = 256;

/// A state on the recorded path of execution. The overflow log is detached:
/// it only ever grows, so the log of the live state contains it as a prefix.
#[derive(Debug, Clone)]
struct Snapshot {
    step: usize,
    state: VMState,
    overflow_log_len: usize,
}

/// Steps through a program such that execution can be replayed and rewound.
///
/// Only the state at the cursor is kept in full. Snapshots of earlier states
/// are retained at regular intervals, and rewinding re-executes from the
/// closest one. Execution is deterministic, so this yields the same state as
/// the original step. The number of snapshots is bounded by
/// [`MAX_NUM_SNAPSHOTS`].
#[derive(Debug, Clone)]
pub struct DebugExecutor {
    initial_state: VMState,
    snapshots: Vec<Snapshot>,
    snapshot_interval: usize,
    current_state: VMState,
    cursor: usize,
    num_recorded_steps: usize,
    error: Option<ExecutionError>,
}

impl DebugExecutor {
    pub fn new(code: &str, inputs_json: &str) -> std::result::Result<Self, PlaygroundError> {
        let program = Program::from_code(code)?;
        let inputs = Inputs::from_json(inputs_json)?;
        Ok(Self::from_state(inputs.initial_state(program)))
    }

    pub fn from_state(initial_state: VMState) -> Self {
        Self {
            current_state: initial_state.clone(),
            initial_state,
            snapshots: vec![],
            snapshot_interval: INITIAL_SNAPSHOT_INTERVAL,
            cursor: 0,
            num_recorded_steps: 0,
            error: None,
        }
    }

    /// The state at the cursor.
    pub fn current_state(&self) -> &VMState {
        &self.current_state
    }

    /// The number of steps between the initial state and the cursor.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn num_recorded_steps(&self) -> usize {
        self.num_recorded_steps
    }

    pub fn num_snapshots(&self) -> usize {
        self.snapshots.len()
    }

    pub fn error(&self) -> Option<&ExecutionError> {
        self.error.as_ref()
    }

    fn ensure_not_terminated(&self) -> Result<()> {
        match &self.error {
            Some(err) => Err(DebugError::Terminated(err.to_string())),
            None => Ok(()),
        }
    }

    /// Advance up to `num_steps` steps. Stops early if the machine halts, or
    /// if a breakpoint is reached after at least one step.
    pub fn play(&mut self, num_steps: u64) -> Result<()> {
        self.ensure_not_terminated()?;
        for _ in 0..num_steps {
            if !self.advance()? {
                break;
            }
            let state = self.current_state();
            if state.is_terminal() || state.program.is_breakpoint(state.instruction_pointer) {
                break;
            }
        }
        Ok(())
    }

    pub fn play_all(&mut self) -> Result<()> {
        self.play(u64::MAX)
    }

    /// Moves the cursor one step forward. Returns `false` if there is no next
    /// step.
    fn advance(&mut self) -> Result<bool> {
        if self.current_state.is_terminal() {
            return Ok(false);
        }
        if let Err(err) = self.current_state.step() {
            warn!(clk = self.current_state.cycle_count, "debug session terminated: {err}");
            self.error = Some(err.clone());
            self.current_state = self.reconstruct(self.cursor)?;
            return Err(err.into());
        }
        self.cursor += 1;

        if self.cursor > self.num_recorded_steps {
            self.num_recorded_steps = self.cursor;
            debug!(
                clk = self.current_state.cycle_count,
                ip = self.current_state.instruction_pointer,
                "recorded step"
            );
            if self.cursor % self.snapshot_interval == 0 {
                self.take_snapshot();
            }
        }
        Ok(true)
    }

    fn take_snapshot(&mut self) {
        let overflow_log = self.current_state.op_stack.take_overflow_log();
        let snapshot = Snapshot {
            step: self.cursor,
            state: self.current_state.clone(),
            overflow_log_len: overflow_log.len(),
        };
        self.current_state.op_stack.restore_overflow_log(overflow_log);
        self.snapshots.push(snapshot);

        if self.snapshots.len() >= MAX_NUM_SNAPSHOTS {
            self.snapshot_interval *= 2;
            let interval = self.snapshot_interval;
            self.snapshots.retain(|snapshot| snapshot.step % interval == 0);
            debug!(interval, "thinned out snapshots");
        }
    }

    /// The state after `step` steps. Must not lie beyond the cursor.
    fn reconstruct(&self, step: usize) -> Result<VMState> {
        let num_preceding = self.snapshots.partition_point(|snapshot| snapshot.step <= step);
        let (mut state, start) = match num_preceding.checked_sub(1) {
            Some(index) => {
                let snapshot = &self.snapshots[index];
                let overflow_log = self.current_state.op_stack.overflow_log().iter();
                let overflow_log = overflow_log.take(snapshot.overflow_log_len).copied().collect();
                let mut state = snapshot.state.clone();
                state.op_stack.restore_overflow_log(overflow_log);
                (state, snapshot.step)
            }
            None => (self.initial_state.clone(), 0),
        };
        for _ in start..step {
            state.step()?;
        }
        Ok(state)
    }

    /// Move the cursor back by up to `num_steps` steps.
    pub fn rewind(&mut self, num_steps: u64) -> Result<()> {
        self.ensure_not_terminated()?;
        let num_steps = usize::try_from(num_steps).unwrap_or(usize::MAX);
        self.move_cursor_to(self.cursor.saturating_sub(num_steps))
    }

    pub fn rewind_all(&mut self) -> Result<()> {
        self.ensure_not_terminated()?;
        self.move_cursor_to(0)
    }

    fn move_cursor_to(&mut self, step: usize) -> Result<()> {
        if step != self.cursor {
            self.current_state = self.reconstruct(step)?;
            self.cursor = step;
        }
        Ok(())
    }

    pub fn print_state(&self) -> DebugState {
        let state = self.current_state();
        let next_instruction = state.current_instruction();
        DebugState {
            clk: state.cycle_count,
            instruction: next_instruction.map(|instruction| instruction.to_string()),
            op: next_instruction.map(|instruction| instruction.name().to_string()),
            operation_index: next_instruction.map(|_| state.instruction_pointer),
            num_of_operations: next_instruction.map(|_| state.program.len()),
            memory: self.print_memory(),
            stack: self.print_stack(),
            error: self.error.as_ref().map(|err| err.to_string()),
        }
    }

    pub fn print_stack(&self) -> Vec<u64> {
        let stack = self.current_state().stack_output();
        stack.into_iter().map(|element| element.value()).collect()
    }

    pub fn print_memory(&self) -> Vec<MemoryEntry> {
        self.current_state()
            .memory
            .iter()
            .map(|(address, word)| MemoryEntry {
                address: address.into(),
                word: word.map(|element| element.value()),
            })
            .collect()
    }

    pub fn print_memory_address(&self, address: u64) -> Result<MemoryEntry> {
        let memory = &self.current_state().memory;
        let word = memory.load_word(address).map_err(ExecutionError::from)?;
        let word = word.map(|element| element.value());
        Ok(MemoryEntry { address, word })
    }

    pub fn clock(&self) -> u32 {
        self.current_state().cycle_count
    }

    pub fn execute(&mut self, command: DebugCommand) -> Result<DebugOutput> {
        let output = match command {
            DebugCommand::RewindAll => {
                self.rewind_all()?;
                DebugOutput::State(self.print_state())
            }
            DebugCommand::Rewind(num_steps) => {
                self.rewind(num_steps)?;
                DebugOutput::State(self.print_state())
            }
            DebugCommand::Play(num_steps) => {
                self.play(num_steps)?;
                DebugOutput::State(self.print_state())
            }
            DebugCommand::PlayAll => {
                self.play_all()?;
                DebugOutput::State(self.print_state())
            }
            DebugCommand::PrintState => DebugOutput::State(self.print_state()),
            DebugCommand::PrintStack => DebugOutput::Stack(self.print_stack()),
            DebugCommand::PrintMemory => DebugOutput::Memory(self.print_memory()),
            DebugCommand::PrintMemoryAddress(address) => {
                DebugOutput::MemoryEntry(self.print_memory_address(address)?)
            }
            DebugCommand::Clock => DebugOutput::Clock(self.clock()),
        };
        Ok(output)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use assert2::assert;
    use assert2::let_assert;
    use proptest::prelude::*;
    use test_strategy::proptest;

    use super::*;
    use crate::vm::RunStatus;

    const PROGRAM: &str = "
        begin
            push.1 push.2 add
            push.1234567 mem_store
            repeat.3 dup.0 mul end
        end";

    /// Never halts. Every iteration grows the stack by one element.
    const ENDLESS_LOOP: &str = "begin push.1 while.true push.1 push.1 end end";

    fn executor(code: &str) -> DebugExecutor {
        DebugExecutor::new(code, "").unwrap()
    }

    fn executor_after(code: &str, num_steps: usize) -> DebugExecutor {
        let mut executor = executor(code);
        executor.play(num_steps as u64).unwrap();
        assert!(num_steps == executor.cursor());
        executor
    }

    #[test]
    fn initial_state_shows_first_instruction() {
        let executor = executor(PROGRAM);
        let state = executor.print_state();
        assert!(0 == state.clk);
        assert!(Some("push.1".to_string()) == state.instruction);
        assert!(Some("push".to_string()) == state.op);
        assert!(Some(0) == state.operation_index);
        assert!(Some(11) == state.num_of_operations);
        assert!(state.memory.is_empty());
        assert!(vec![0; 16] == state.stack);
        assert!(state.error.is_none());
    }

    #[test]
    fn playing_everything_runs_to_completion() {
        let mut executor = executor(PROGRAM);
        let_assert!(Ok(DebugOutput::State(state)) = executor.execute(DebugCommand::PlayAll));
        assert!(11 == state.clk);
        assert!(state.instruction.is_none());
        assert!(state.op.is_none());
        assert!(state.operation_index.is_none());
        let expected_memory = MemoryEntry {
            address: 1_234_567,
            word: [3, 0, 0, 0],
        };
        assert!(vec![expected_memory] == state.memory);
        assert!(vec![0; 16] == state.stack);
    }

    #[test]
    fn playing_single_steps_advances_the_clock_by_one() {
        let mut executor = executor(PROGRAM);
        let_assert!(Ok(DebugOutput::State(state)) = executor.execute(DebugCommand::Play(1)));
        assert!(1 == state.clk);
        assert!(Some("push.2".to_string()) == state.instruction);
        let_assert!(Ok(DebugOutput::State(state)) = executor.execute(DebugCommand::Play(1)));
        assert!(2 == state.clk);
        let_assert!(Ok(DebugOutput::Clock(2)) = executor.execute(DebugCommand::Clock));
    }

    #[test]
    fn rewinding_keeps_track_of_recorded_steps() {
        let mut executor = executor(PROGRAM);
        let_assert!(Ok(()) = executor.play(5));
        let_assert!(Ok(()) = executor.rewind(2));
        assert!(3 == executor.clock());
        assert!(5 == executor.num_recorded_steps());
        let_assert!(Ok(()) = executor.rewind(100));
        assert!(0 == executor.clock());
        let_assert!(Ok(()) = executor.play(2));
        assert!(5 == executor.num_recorded_steps());
    }

    #[proptest]
    fn rewind_then_replay_is_idempotent(#[strategy(0_u64..12)] num_steps: u64) {
        let mut executor = executor(PROGRAM);
        executor.play(num_steps)?;
        let played = executor.print_state();
        prop_assert_eq!(&played, &executor.print_state());

        executor.rewind(num_steps)?;
        executor.play(num_steps)?;
        prop_assert_eq!(played, executor.print_state());
    }

    #[test]
    fn snapshots_are_taken_at_intervals_and_hold_no_overflow_log() {
        let executor = executor_after(ENDLESS_LOOP, 1000);
        assert!(1000 / INITIAL_SNAPSHOT_INTERVAL == executor.num_snapshots());
        assert!(!executor.current_state().op_stack.overflow_log().is_empty());
        for snapshot in &executor.snapshots {
            assert!(snapshot.step % INITIAL_SNAPSHOT_INTERVAL == 0);
            assert!(snapshot.state.op_stack.overflow_log().is_empty());
        }
    }

    #[test]
    fn rewinding_restores_the_state_of_the_original_step() {
        let mut executor = executor_after(ENDLESS_LOOP, 1000);
        let played = executor.current_state().clone();

        let_assert!(Ok(()) = executor.rewind(777));
        assert!(223 == executor.cursor());
        let reference = executor_after(ENDLESS_LOOP, 223);
        assert!(reference.current_state() == executor.current_state());
        assert!(1000 == executor.num_recorded_steps());

        let_assert!(Ok(()) = executor.play(777));
        assert!(&played == executor.current_state());
        assert!(1000 / INITIAL_SNAPSHOT_INTERVAL == executor.num_snapshots());
    }

    #[test]
    fn number_of_snapshots_is_bounded() {
        let num_steps = 20_000;
        let mut executor = executor_after(ENDLESS_LOOP, num_steps);
        assert!(executor.num_snapshots() < MAX_NUM_SNAPSHOTS);
        assert!(2 * INITIAL_SNAPSHOT_INTERVAL == executor.snapshot_interval);
        let snapshot_steps = executor.snapshots.iter().map(|snapshot| snapshot.step);
        assert!(snapshot_steps.is_sorted());

        let_assert!(Ok(()) = executor.rewind(3_500));
        let reference = executor_after(ENDLESS_LOOP, num_steps - 3_500);
        assert!(reference.current_state() == executor.current_state());
    }

    #[proptest(cases = 32)]
    fn rewinding_is_indistinguishable_from_stopping_early(
        #[strategy(0_usize..400)] num_played: usize,
        #[strategy(0_usize..400)] num_rewound: usize,
    ) {
        let mut executor = executor_after(ENDLESS_LOOP, num_played);
        executor.rewind(num_rewound as u64)?;
        let reference = executor_after(ENDLESS_LOOP, num_played.saturating_sub(num_rewound));
        prop_assert_eq!(reference.current_state(), executor.current_state());
    }

    #[test]
    fn program_without_instructions_records_no_steps() {
        let mut executor = executor("begin end");
        assert!(executor.current_state().is_terminal());
        let_assert!(Ok(()) = executor.play(1));
        assert!(0 == executor.clock());
        assert!(0 == executor.num_recorded_steps());
        assert!(executor.print_state().instruction.is_none());
    }

    #[test]
    fn breakpoints_stop_playback() {
        let code = "begin push.1 breakpoint push.2 push.3 breakpoint add end";
        let mut executor = executor(code);
        let_assert!(Ok(()) = executor.play_all());
        assert!(1 == executor.clock());
        let_assert!(Ok(()) = executor.play_all());
        assert!(3 == executor.clock());
        let_assert!(Ok(()) = executor.play_all());
        assert!(4 == executor.clock());
        assert!(executor.current_state().is_terminal());
    }

    #[test]
    fn failing_step_terminates_the_session() {
        let mut executor = executor("begin push.0 assert push.1 end");
        let_assert!(Err(DebugError::Execution(_)) = executor.play_all());
        let state = executor.print_state();
        assert!(1 == state.clk);
        assert!(Some("assertion failed: expected 1, got 0".to_string()) == state.error);

        let_assert!(Err(DebugError::Terminated(message)) = executor.play(1));
        assert!(state.error == Some(message));
        let_assert!(Err(DebugError::Terminated(_)) = executor.rewind_all());
        let_assert!(Ok(DebugOutput::State(_)) = executor.execute(DebugCommand::PrintState));
    }

    #[test]
    fn failing_step_after_many_steps_shows_the_state_before_failure() {
        let mut executor = executor("begin repeat.100 push.1 end push.0 assert end");
        let_assert!(Err(DebugError::Execution(_)) = executor.play_all());
        let state = executor.print_state();
        assert!(101 == state.clk);
        assert!(Some("assert".to_string()) == state.instruction);
        assert!(0 == state.stack[0]);
        assert!(RunStatus::Failed != executor.current_state().status);
    }

    #[test]
    fn memory_can_be_inspected_by_address() {
        let mut executor = executor("begin push.7 mem_store.3 end");
        let_assert!(Ok(()) = executor.play_all());
        let_assert!(Ok(entry) = executor.print_memory_address(3));
        assert!([7, 0, 0, 0] == entry.word);
        let_assert!(Ok(entry) = executor.print_memory_address(4));
        assert!([0; 4] == entry.word);
        let_assert!(Err(DebugError::Execution(_)) = executor.print_memory_address(1 << 32));
    }

    #[test]
    fn invalid_program_or_inputs_are_reported_on_creation() {
        let_assert!(Err(PlaygroundError::Program(_)) = DebugExecutor::new("begin pish.1 end", ""));
        let inputs = r#"{"stack_init": ["x"]}"#;
        let_assert!(Err(PlaygroundError::Input(_)) = DebugExecutor::new("begin end", inputs));
    }

    #[test]
    fn textual_commands_are_parsed() {
        assert!(Ok(DebugCommand::Play(3)) == "play 3".parse::<DebugCommand>());
        assert!(Ok(DebugCommand::PlayAll) == "play".parse::<DebugCommand>());
        assert!(Ok(DebugCommand::Rewind(2)) == " rewind 2 ".parse::<DebugCommand>());
        assert!(Ok(DebugCommand::RewindAll) == "rewind".parse::<DebugCommand>());
        assert!(Ok(DebugCommand::PrintMemoryAddress(5)) == "mem 5".parse::<DebugCommand>());
        assert!(Ok(DebugCommand::Clock) == "clk".parse::<DebugCommand>());
        let_assert!(Err(DebugError::UnknownCommand(_)) = "play x".parse::<DebugCommand>());
        let_assert!(Err(DebugError::UnknownCommand(_)) = "fly 1".parse::<DebugCommand>());
        let_assert!(Err(DebugError::UnknownCommand(_)) = "".parse::<DebugCommand>());
    }
}
