use std::collections::{vec_deque, VecDeque};

use crate::plat::{
    num::{format_word, mask16, parse_literal, ParseError, IMM_MAX, IMM_MIN},
    Instruction, Program, Register,
};

use super::{
    alu::AluMode,
    clock::Clock,
    io::{InputSource, OutputSink, StdinSource, StdoutSink},
    ram::Ram,
    registers::EmuRegisters,
    trace::{Observer, StepEvent},
    EmuError, Fault,
};

/// How many executed instructions the emulator remembers for backtraces.
pub const HISTORY_LEN: usize = 32;

/// The emulator's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmuState {
    /// The emulator is allowed to run.
    Running,
    /// Execution finished, either by `HALT` or by running past the last instruction.
    Halted,
    /// Execution stopped on a [Fault]. Recoverable only by building a new emulator.
    Faulted,
}

/// Where the PC goes after an instruction.
enum Flow {
    Next,
    Jump(usize),
    Halt,
}

/// The main emulation context for CPYU-16.
///
/// Owns the register file, data memory, PC and the (read-only) program for one run.
pub struct Emulator<I = StdinSource, O = StdoutSink> {
    pub registers: EmuRegisters,
    pub ram: Ram,
    program: Program,
    pc: usize,
    state: EmuState,
    fault: Option<Fault>,
    steps: u64,
    history: VecDeque<(usize, Instruction)>,
    input: I,
    output: O,
    observer: Option<Box<dyn Observer>>,
    clock: Option<Clock>,
}

impl Emulator {
    /// Loads a program into a new [Emulator] reading `IN` from stdin and printing `OUT` to stdout.
    pub fn with_stdio(program: Program) -> Self {
        Self::new(program, StdinSource::stdin(), StdoutSink)
    }
}

impl<I: InputSource, O: OutputSink> Emulator<I, O> {
    /// Loads a program into a new [Emulator] instance, with zeroed registers and memory.
    pub fn new(program: Program, input: I, output: O) -> Self {
        Self {
            registers: EmuRegisters::default(),
            ram: Ram::new(),
            program,
            pc: 0,
            state: EmuState::Running,
            fault: None,
            steps: 0,
            history: VecDeque::with_capacity(HISTORY_LEN),
            input,
            output,
            observer: None,
            clock: None,
        }
    }

    /// Paces execution to `rate_hz` instructions per second.
    ///
    /// # Errors
    ///
    /// This function will return an error if the rate is invalid or the Tokio runtime fails to initialize.
    pub fn with_clock_rate(mut self, rate_hz: f64) -> Result<Self, EmuError> {
        self.clock = Some(Clock::new(rate_hz)?);
        Ok(self)
    }

    /// Installs an observer called after every executed instruction, replacing any previous one.
    pub fn set_observer(&mut self, observer: impl Observer + 'static) {
        self.observer = Some(Box::new(observer));
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn state(&self) -> EmuState {
        self.state
    }

    /// The fault that stopped the emulator, if it is [`EmuState::Faulted`].
    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    /// Number of instructions executed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// The most recently executed `(pc, instruction)` pairs, oldest first.
    pub fn history(&self) -> vec_deque::Iter<'_, (usize, Instruction)> {
        self.history.iter()
    }

    pub fn input(&self) -> &I {
        &self.input
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn into_output(self) -> O {
        self.output
    }

    /// Stops a running emulator without executing anything else.
    pub fn halt(&mut self) {
        if self.state == EmuState::Running {
            log::debug!("halted by request at pc={:05}", self.pc);
            self.state = EmuState::Halted;
        }
    }

    /// Executes the instruction at the PC.
    ///
    /// # Errors
    ///
    /// Returns [`EmuError::NotRunning`] if the emulator has already halted or faulted, and
    /// [`EmuError::Fault`] if the instruction faults (the emulator is then [`EmuState::Faulted`]).
    pub fn step(&mut self) -> Result<EmuState, EmuError> {
        if self.state != EmuState::Running {
            return Err(EmuError::NotRunning(self.state));
        }
        let pc = self.pc;
        let Some(instr) = self.program.get(pc) else {
            log::debug!("pc={pc:05} is outside the program, halting");
            self.state = EmuState::Halted;
            return Ok(self.state);
        };
        if let Some(clock) = self.clock.as_mut() {
            clock.tick();
        }
        let before = self.observer.is_some().then(|| self.registers.snapshot());

        log::trace!(">>> {pc:05}: {instr}");
        let flow = match self.execute(instr) {
            Ok(flow) => flow,
            Err(fault) => {
                log::debug!("fault at pc={pc:05}: {fault}");
                self.state = EmuState::Faulted;
                self.fault = Some(fault.clone());
                return Err(EmuError::Fault {
                    pc,
                    line: self.program.source_line(pc).unwrap_or_default(),
                    fault,
                });
            }
        };

        self.steps += 1;
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back((pc, instr));

        match flow {
            Flow::Next => self.pc = pc + 1,
            Flow::Jump(target) => self.pc = target,
            Flow::Halt => {
                log::debug!("HALT at pc={pc:05} after {} step(s)", self.steps);
                self.state = EmuState::Halted;
            }
        }
        if self.state == EmuState::Running && self.pc >= self.program.len() {
            log::debug!("pc={:05} ran past the program, halting", self.pc);
            self.state = EmuState::Halted;
        }

        if let (Some(observer), Some(before)) = (self.observer.as_mut(), before) {
            let changed = self.registers.changed_since(&before);
            observer.on_step(&StepEvent {
                pc,
                instruction: instr,
                changed: &changed,
                state: self.state,
            });
        }
        Ok(self.state)
    }

    /// Runs the emulator, stepping through instructions until it halts. Returns the number of
    /// instructions executed by this call.
    ///
    /// # Errors
    ///
    /// See [`step`](Self::step).
    pub fn run_until_halt(&mut self) -> Result<u64, EmuError> {
        self.run(None)
    }

    /// Like [`run_until_halt`](Self::run_until_halt), but gives up with [`EmuError::StepLimit`] once
    /// `max_steps` instructions have executed without halting.
    ///
    /// # Errors
    ///
    /// See [`step`](Self::step).
    pub fn run_with_limit(&mut self, max_steps: u64) -> Result<u64, EmuError> {
        self.run(Some(max_steps))
    }

    fn run(&mut self, limit: Option<u64>) -> Result<u64, EmuError> {
        if self.state != EmuState::Running {
            return Err(EmuError::NotRunning(self.state));
        }
        let start = self.steps;
        while self.state == EmuState::Running {
            if let Some(limit) = limit.filter(|&l| self.steps - start >= l) {
                return Err(EmuError::StepLimit(limit));
            }
            self.step()?;
        }
        Ok(self.steps - start)
    }

    fn reg(&self, reg: Register) -> u16 {
        self.registers.read(reg)
    }

    fn alu(&mut self, mode: AluMode, rd: Register, left: u16, right: u16) {
        let result = mode.apply(left, right);
        self.registers.write(rd, result);
    }

    fn read_input(&mut self) -> Result<u16, Fault> {
        let token = match self.input.next_token() {
            Ok(Some(token)) => token,
            Ok(None) => return Err(Fault::InvalidInput("end of input".into())),
            Err(e) => return Err(Fault::InvalidInput(e.to_string())),
        };
        match parse_literal(&token) {
            Ok(value) if (IMM_MIN..=IMM_MAX).contains(&value) => Ok(mask16(value)),
            Ok(_) | Err(ParseError::Overflow(_)) => Err(Fault::InputRange(token)),
            Err(e) => Err(Fault::InvalidInput(e.to_string())),
        }
    }

    fn execute(&mut self, instr: Instruction) -> Result<Flow, Fault> {
        match instr {
            Instruction::Add { rd, rs1, rs2 } => {
                self.alu(AluMode::Add, rd, self.reg(rs1), self.reg(rs2))
            }
            Instruction::Sub { rd, rs1, rs2 } => {
                self.alu(AluMode::Sub, rd, self.reg(rs1), self.reg(rs2))
            }
            Instruction::And { rd, rs1, rs2 } => {
                self.alu(AluMode::And, rd, self.reg(rs1), self.reg(rs2))
            }
            Instruction::Or { rd, rs1, rs2 } => {
                self.alu(AluMode::Or, rd, self.reg(rs1), self.reg(rs2))
            }
            Instruction::Xor { rd, rs1, rs2 } => {
                self.alu(AluMode::Xor, rd, self.reg(rs1), self.reg(rs2))
            }
            Instruction::Addi { rd, rs1, imm } => self.alu(AluMode::Add, rd, self.reg(rs1), imm),
            Instruction::Ld { rd, addr } => {
                let value = self.ram.read(addr)?;
                self.registers.write(rd, value);
            }
            Instruction::St { rs, addr } => {
                let value = self.reg(rs);
                self.ram.write(addr, value)?;
            }
            Instruction::Beq { rs1, rs2, target } => {
                if self.reg(rs1) == self.reg(rs2) {
                    return Ok(Flow::Jump(target));
                }
            }
            Instruction::Bne { rs1, rs2, target } => {
                if self.reg(rs1) != self.reg(rs2) {
                    return Ok(Flow::Jump(target));
                }
            }
            Instruction::Jmp { target } => return Ok(Flow::Jump(target)),
            Instruction::In { rd } => {
                let value = self.read_input()?;
                self.registers.write(rd, value);
            }
            Instruction::Out { rs } => {
                let text = format_word(self.reg(rs));
                self.output.emit(&text);
            }
            Instruction::Halt => return Ok(Flow::Halt),
        }
        Ok(Flow::Next)
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use proptest::prelude::*;

    use super::*;
    use crate::{asm::assemble, emu::io::ReaderSource};

    type TestEmu = Emulator<ReaderSource<&'static [u8]>, Vec<String>>;

    fn load(source: &str, input: &'static str) -> TestEmu {
        let program = assemble(source).unwrap();
        Emulator::new(program, ReaderSource::new(input.as_bytes()), Vec::new())
    }

    fn reg(emu: &TestEmu, i: u8) -> u16 {
        emu.registers.read(Register::try_from(i).unwrap())
    }

    fn fault_of(result: Result<u64, EmuError>) -> Fault {
        match result {
            Err(EmuError::Fault { fault, .. }) => fault,
            other => panic!("expected a fault, got {other:?}"),
        }
    }

    #[test]
    fn test_add_and_out() {
        let mut emu = load("LI r1,10\nLI r2,20\nADD r3,r1,r2\nOUT r3\nHALT", "");
        assert_eq!(emu.run_until_halt().unwrap(), 5);
        assert_eq!(emu.state(), EmuState::Halted);
        assert_eq!(emu.output(), &["+00030 (0x001e)"]);
        assert_eq!(reg(&emu, 3), 30);
    }

    #[test]
    fn test_wraparound() {
        let mut emu = load(
            "LI r1, 65530\nADDI r1, r1, 10\nLI r2, 3\nLI r3, 5\nSUB r4, r2, r3\nOUT r1\nOUT r4\nHALT",
            "",
        );
        emu.run_until_halt().unwrap();
        assert_eq!(reg(&emu, 1), 4);
        assert_eq!(reg(&emu, 4), 0xFFFE);
        assert_eq!(emu.output(), &["+00004 (0x0004)", "-00002 (0xfffe)"]);
    }

    #[test]
    fn test_bitwise() {
        let mut emu = load(
            "LI r1, 0xF0F0\nLI r2, 0xFF00\nAND r3, r1, r2\nOR r4, r1, r2\nXOR r5, r1, r2\nHALT",
            "",
        );
        emu.run_until_halt().unwrap();
        assert_eq!(reg(&emu, 3), 0xF000);
        assert_eq!(reg(&emu, 4), 0xFFF0);
        assert_eq!(reg(&emu, 5), 0x0FF0);
    }

    #[test]
    fn test_r0_is_hardwired() {
        let mut emu = load(
            "LI r0, 5\nADDI r0, r0, 1\nLI r1, 9\nMOV r0, r1\nIN r0\nLD r0, 0\nOUT r0\nHALT",
            "77",
        );
        emu.ram.write(0, 123).unwrap();
        emu.run_until_halt().unwrap();
        assert_eq!(reg(&emu, 0), 0);
        assert_eq!(emu.output(), &["+00000 (0x0000)"]);
    }

    #[test]
    fn test_in_out_roundtrip() {
        let mut emu = load("IN r1\nOUT r1\nIN r2\nOUT r2\nHALT", "-1\n0x10\n");
        emu.run_until_halt().unwrap();
        assert_eq!(reg(&emu, 1), 65535);
        assert_eq!(reg(&emu, 2), 16);
        assert_eq!(emu.output(), &["-00001 (0xffff)", "+00016 (0x0010)"]);
    }

    #[test]
    fn test_in_range_limits() {
        let mut emu = load("IN r1\nIN r2\nHALT", "-32768 65535");
        emu.run_until_halt().unwrap();
        assert_eq!(reg(&emu, 1), 0x8000);
        assert_eq!(reg(&emu, 2), 0xFFFF);

        let mut emu = load("IN r1\nHALT", "70000");
        assert_eq!(fault_of(emu.run_until_halt()), Fault::InputRange("70000".into()));
        assert_eq!(emu.state(), EmuState::Faulted);
        assert_eq!(emu.fault(), Some(&Fault::InputRange("70000".into())));
        assert_eq!(reg(&emu, 1), 0);

        let mut emu = load("IN r1\nHALT", "-32769");
        assert_eq!(fault_of(emu.run_until_halt()), Fault::InputRange("-32769".into()));
    }

    #[test]
    fn test_in_huge_value_is_out_of_range() {
        for input in ["99999999999", "-0x123456789"] {
            let mut emu = load("IN r1\nHALT", input);
            assert_eq!(
                fault_of(emu.run_until_halt()),
                Fault::InputRange(input.into())
            );
        }
    }

    #[test]
    fn test_invalid_input() {
        for input in ["abc", "", "12abc", "0x"] {
            let mut emu = load("IN r1\nHALT", input);
            assert!(
                matches!(fault_of(emu.run_until_halt()), Fault::InvalidInput(_)),
                "{input:?}"
            );
        }
    }

    #[test]
    fn test_memory_bounds() {
        let mut emu = load(
            "LI r1, 7\nST r1, 0\nST r1, 65535\nLD r2, 65535\nLD r3, 0\nLD r4, 100\nHALT",
            "",
        );
        emu.ram.write(100, 42).unwrap();
        emu.run_until_halt().unwrap();
        assert_eq!(emu.ram.read(65535), Ok(7));
        assert_eq!((reg(&emu, 2), reg(&emu, 3), reg(&emu, 4)), (7, 7, 42));

        for source in ["LD r1, 65536", "LD r1, -1", "ST r0, 65536", "ST r0, -1"] {
            let mut emu = load(source, "");
            assert!(
                matches!(
                    fault_of(emu.run_until_halt()),
                    Fault::MemoryOutOfBounds(65536 | -1)
                ),
                "{source}"
            );
        }
    }

    #[test]
    fn test_fault_reports_pc_and_line() {
        let mut emu = load("; start\nLI r1, 1\n\nLD r1, 70000\nHALT", "");
        match emu.run_until_halt() {
            Err(EmuError::Fault { pc, line, fault }) => {
                assert_eq!((pc, line), (1, 4));
                assert_eq!(fault, Fault::MemoryOutOfBounds(70000));
            }
            other => panic!("expected a fault, got {other:?}"),
        }
        assert_eq!(emu.pc(), 1);
        assert_eq!(emu.steps(), 1);
    }

    #[test]
    fn test_branches() {
        let program = "
    LI   r1, 7
    LI   r2, 7
    BNE  r1, r2, wrong
    LI   r3, 0x002A
    JMP  done
wrong:
    LI   r3, 0x0000
done:
    BEQ  r1, r0, never
    OUT  r3
    HALT
never:
    HALT
";
        let mut emu = load(program, "");
        emu.run_until_halt().unwrap();
        assert_eq!(emu.output(), &["+00042 (0x002a)"]);
    }

    #[test]
    fn test_sum_loop() {
        let program = "
    IN   r1          ; N
    LI   r2, 0       ; sum
    LI   r3, 0       ; i
loop:
    ADDI r3, r3, 1
    IN   r4
    ADD  r2, r2, r4
    BNE  r3, r1, loop
    OUT  r2
    HALT
";
        let mut emu = load(program, "5\n1 2 3 4 5\n");
        emu.run_with_limit(1000).unwrap();
        assert_eq!(emu.state(), EmuState::Halted);
        assert_eq!(emu.output(), &["+00015 (0x000f)"]);
        assert_eq!(reg(&emu, 3), 5);
    }

    #[test]
    fn test_stepping_after_halt_is_rejected() {
        let mut emu = load("HALT", "");
        assert_eq!(emu.step().unwrap(), EmuState::Halted);
        assert!(matches!(
            emu.step(),
            Err(EmuError::NotRunning(EmuState::Halted))
        ));
        assert!(matches!(
            emu.run_until_halt(),
            Err(EmuError::NotRunning(EmuState::Halted))
        ));
        assert_eq!(emu.steps(), 1);

        let mut emu = load("LD r1, -1", "");
        assert!(emu.step().is_err());
        assert!(matches!(
            emu.step(),
            Err(EmuError::NotRunning(EmuState::Faulted))
        ));
    }

    #[test]
    fn test_running_past_the_end_halts() {
        let mut emu = load("LI r1, 1\nLI r2, 2", "");
        assert_eq!(emu.run_until_halt().unwrap(), 2);
        assert_eq!(emu.state(), EmuState::Halted);

        let mut emu = load("JMP 100\nOUT r0", "");
        assert_eq!(emu.run_until_halt().unwrap(), 1);
        assert!(emu.output().is_empty());

        let mut emu = load("; nothing here", "");
        assert_eq!(emu.state(), EmuState::Running);
        assert_eq!(emu.step().unwrap(), EmuState::Halted);
        assert_eq!(emu.steps(), 0);
    }

    #[test]
    fn test_empty_program_runs_to_completion() {
        let mut emu = load("; nothing but a comment\n", "");
        assert_eq!(emu.run_with_limit(1_000_000).unwrap(), 0);
        assert_eq!(emu.state(), EmuState::Halted);
        assert!(emu.output().is_empty());

        let mut emu = load("", "");
        assert_eq!(emu.run_until_halt().unwrap(), 0);
    }

    #[test]
    fn test_step_limit() {
        let mut emu = load("spin: JMP spin", "");
        assert!(matches!(
            emu.run_with_limit(100),
            Err(EmuError::StepLimit(100))
        ));
        assert_eq!(emu.state(), EmuState::Running);
        assert_eq!(emu.steps(), 100);

        let mut emu = load("LI r1, 1\nHALT", "");
        assert_eq!(emu.run_with_limit(2).unwrap(), 2);
    }

    #[test]
    fn test_halt_request() {
        let mut emu = load("spin: JMP spin", "");
        emu.step().unwrap();
        emu.halt();
        assert_eq!(emu.state(), EmuState::Halted);
        assert_eq!(emu.pc(), 0);
    }

    #[test]
    fn test_history() {
        let mut emu = load("LI r1, 40\nloop: ADDI r1, r1, -1\nBNE r1, r0, loop\nHALT", "");
        emu.run_until_halt().unwrap();
        assert_eq!(emu.steps(), 82);
        assert_eq!(emu.history().len(), HISTORY_LEN);
        assert_eq!(emu.history().last(), Some(&(3, Instruction::Halt)));
    }

    #[derive(Default)]
    struct Recorder(Rc<RefCell<Vec<(usize, Vec<(Register, u16)>, EmuState)>>>);

    impl Observer for Recorder {
        fn on_step(&mut self, event: &StepEvent<'_>) {
            self.0
                .borrow_mut()
                .push((event.pc, event.changed.to_vec(), event.state));
        }
    }

    #[test]
    fn test_observer_sees_every_step() {
        let recorder = Recorder::default();
        let events = Rc::clone(&recorder.0);
        let mut emu = load("LI r1, 3\nMOV r2, r1\nOUT r2\nHALT", "");
        emu.set_observer(recorder);
        emu.run_until_halt().unwrap();

        let r = |i: u8| Register::try_from(i).unwrap();
        let events = events.borrow();
        assert_eq!(
            *events,
            vec![
                (0, vec![(r(1), 3)], EmuState::Running),
                (1, vec![(r(2), 3)], EmuState::Running),
                (2, vec![], EmuState::Running),
                (3, vec![], EmuState::Halted),
            ]
        );
    }

    proptest! {
        #[test]
        fn test_add_then_sub_through_engine(a in any::<u16>(), b in any::<u16>()) {
            let source = format!("LI r1, {a}\nLI r2, {b}\nADD r3, r1, r2\nSUB r4, r3, r2\nHALT");
            let mut emu = load(&source, "");
            emu.run_until_halt().unwrap();
            prop_assert_eq!(reg(&emu, 4), a);
            prop_assert_eq!(u32::from(reg(&emu, 3)), (u32::from(a) + u32::from(b)) % 65536);
        }
    }
}
