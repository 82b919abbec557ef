use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::hash_map::Entry;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;

use itertools::Itertools;
use thiserror::Error;
use twenty_first::prelude::*;

use crate::instruction::AnInstruction;
use crate::instruction::Instruction;
use crate::instruction::LabelledInstruction;
use crate::parser;
use crate::parser::Procedure;
use crate::parser::SourceNode;
use crate::parser::SyntaxTree;

type Result<T> = std::result::Result<T, ProgramError>;

/// The label of the first instruction of a program's main block. Being a
/// keyword, it cannot clash with any procedure name.
pub const ENTRY_LABEL: &str = "begin";

/// Programs longer than this are rejected. Mostly guards against unrolling
/// deeply nested `repeat` blocks.
pub const MAX_PROGRAM_LENGTH: usize = 1 << 20;

#[non_exhaustive]
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ProgramError {
    #[error("failed to parse program:\n{0}")]
    Parse(String),

    #[error("procedure `{0}` is defined more than once")]
    DuplicateProcedure(String),

    #[error("procedure `{0}` is not defined")]
    UnknownProcedure(String),

    #[error("procedure `{0}` calls itself, directly or indirectly")]
    RecursiveProcedure(String),

    #[error("label `{0}` is defined more than once")]
    DuplicateLabel(String),

    #[error("label `{0}` is not defined")]
    MissingLabel(String),

    #[error("program exceeds the maximum length of {MAX_PROGRAM_LENGTH} instructions")]
    ProgramTooLong,
}

/// A program for the playground's stack machine.
///
/// All control flow is explicit: procedures come first, each ending in a
/// [`Return`](AnInstruction::Return), followed by the main block. Execution
/// starts at the [entry point](Self::entry_point) and halts once the
/// instruction pointer runs past the last instruction.
///
/// A program may contain debug information, such as label names and
/// breakpoints. Access this information through methods
/// [`label_for_address()`][label_for_address] and
/// [`is_breakpoint()`][is_breakpoint].
///
/// [label_for_address]: Program::label_for_address
/// [is_breakpoint]: Program::is_breakpoint
#[derive(Debug, Clone, Eq)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    entry_point: usize,
    address_to_label: HashMap<usize, String>,
    breakpoints: Vec<bool>,
}

impl Display for Program {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for instruction in self.labelled_instructions() {
            match instruction {
                LabelledInstruction::Label(_) => writeln!(f, "{instruction}")?,
                _ => writeln!(f, "  {instruction}")?,
            }
        }
        Ok(())
    }
}

impl PartialEq for Program {
    fn eq(&self, other: &Program) -> bool {
        self.entry_point == other.entry_point && self.instructions == other.instructions
    }
}

impl Program {
    pub fn new(labelled_instructions: &[LabelledInstruction]) -> Result<Self> {
        let label_to_address = build_label_to_address_map(labelled_instructions)?;
        let instructions = turn_labels_into_addresses(labelled_instructions, &label_to_address)?;
        let entry_point = label_to_address.get(ENTRY_LABEL).copied().unwrap_or(0);
        let breakpoints = extract_breakpoints(labelled_instructions);
        // Several labels can share an address. Named ones take precedence over
        // generated ones, which all contain a `.`.
        let mut address_to_label = HashMap::new();
        let labels = label_to_address
            .into_iter()
            .sorted_by_key(|(label, _)| (label.contains('.'), label.clone()));
        for (label, address) in labels {
            address_to_label.entry(address).or_insert(label);
        }

        debug_assert_eq!(instructions.len(), breakpoints.len());
        Ok(Program {
            instructions,
            entry_point,
            address_to_label,
            breakpoints,
        })
    }

    /// Create a `Program` by parsing source code.
    pub fn from_code(code: &str) -> Result<Self> {
        let syntax_tree =
            parser::parse(code).map_err(|err| ProgramError::Parse(err.to_string()))?;
        Self::from_syntax_tree(&syntax_tree)
    }

    /// Lower structured control flow into labelled jumps and build the program.
    pub fn from_syntax_tree(syntax_tree: &SyntaxTree) -> Result<Self> {
        ensure_procedures_are_sound(syntax_tree)?;

        let mut lowering = Lowering::default();
        for Procedure { name, body } in &syntax_tree.procedures {
            lowering.emit(LabelledInstruction::Label(name.clone()))?;
            lowering.lower_block(body)?;
            lowering.emit_instruction(AnInstruction::Return)?;
        }
        lowering.emit(LabelledInstruction::Label(ENTRY_LABEL.to_string()))?;
        lowering.lower_block(&syntax_tree.main)?;

        Self::new(&lowering.labelled_instructions)
    }

    pub fn labelled_instructions(&self) -> Vec<LabelledInstruction> {
        let mut labelled_instructions = vec![];
        for (address, instruction) in self.instructions.iter().enumerate() {
            if let Some(label) = self.address_to_label.get(&address) {
                labelled_instructions.push(LabelledInstruction::Label(label.clone()));
            }
            if self.is_breakpoint(address) {
                labelled_instructions.push(LabelledInstruction::Breakpoint);
            }
            let instruction =
                instruction.map_call_address(|&address| self.label_for_address(address));
            labelled_instructions.push(LabelledInstruction::Instruction(instruction));
        }

        let leftover_labels = self
            .address_to_label
            .iter()
            .filter(|&(&address, _)| address >= self.instructions.len())
            .sorted();
        for (_, label) in leftover_labels {
            labelled_instructions.push(LabelledInstruction::Label(label.clone()));
        }

        labelled_instructions
    }

    /// The address of the first instruction of the main block.
    pub fn entry_point(&self) -> usize {
        self.entry_point
    }

    pub fn instruction(&self, address: usize) -> Option<Instruction> {
        self.instructions.get(address).copied()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn is_breakpoint(&self, address: usize) -> bool {
        self.breakpoints.get(address).copied().unwrap_or_default()
    }

    /// The label for the given address, or a deterministic, unique substitute
    /// if no label is found.
    pub fn label_for_address(&self, address: usize) -> String {
        self.address_to_label
            .get(&address)
            .cloned()
            .unwrap_or_else(|| format!("address_{address}"))
    }

    /// Turn the program into a sequence of `BFieldElement`s: the entry point,
    /// followed by each instruction's opcode and argument (if any).
    pub fn to_bwords(&self) -> Vec<BFieldElement> {
        let entry_point = bfe!(self.entry_point as u64);
        let instructions = self.instructions.iter().flat_map(|instruction| {
            let opcode = instruction.opcode_b();
            match instruction.arg() {
                Some(arg) => vec![opcode, arg],
                None => vec![opcode],
            }
        });

        std::iter::once(entry_point).chain(instructions).collect()
    }

    /// Produces the program's canonical hash digest, using [`Tip5`].
    pub fn hash(&self) -> Digest {
        Tip5::hash_varlen(&self.to_bwords())
    }
}

fn build_label_to_address_map(
    labelled_instructions: &[LabelledInstruction],
) -> Result<HashMap<String, usize>> {
    let mut label_map = HashMap::new();
    let mut instruction_pointer = 0;

    for labelled_instruction in labelled_instructions {
        match labelled_instruction {
            LabelledInstruction::Instruction(_) => instruction_pointer += 1,
            LabelledInstruction::Breakpoint => (),
            LabelledInstruction::Label(label) => {
                let Entry::Vacant(new_entry) = label_map.entry(label.clone()) else {
                    return Err(ProgramError::DuplicateLabel(label.clone()));
                };
                new_entry.insert(instruction_pointer);
            }
        }
    }

    Ok(label_map)
}

fn turn_labels_into_addresses(
    labelled_instructions: &[LabelledInstruction],
    label_to_address: &HashMap<String, usize>,
) -> Result<Vec<Instruction>> {
    let mut instructions = vec![];
    for labelled_instruction in labelled_instructions {
        let LabelledInstruction::Instruction(instruction) = labelled_instruction else {
            continue;
        };

        let mut missing_label = None;
        let instruction = instruction.map_call_address(|label| {
            label_to_address.get(label).copied().unwrap_or_else(|| {
                missing_label = Some(label.clone());
                0
            })
        });
        if let Some(label) = missing_label {
            return Err(ProgramError::MissingLabel(label));
        }
        instructions.push(instruction);
    }

    Ok(instructions)
}

/// A breakpoint marks the instruction following it.
fn extract_breakpoints(labelled_instructions: &[LabelledInstruction]) -> Vec<bool> {
    let mut breakpoints = vec![];
    let mut break_before_next_instruction = false;
    for labelled_instruction in labelled_instructions {
        match labelled_instruction {
            LabelledInstruction::Instruction(_) => {
                breakpoints.push(break_before_next_instruction);
                break_before_next_instruction = false;
            }
            LabelledInstruction::Label(_) => (),
            LabelledInstruction::Breakpoint => break_before_next_instruction = true,
        }
    }

    breakpoints
}

fn ensure_procedures_are_sound(syntax_tree: &SyntaxTree) -> Result<()> {
    let mut call_graph = HashMap::new();
    for procedure in &syntax_tree.procedures {
        let callees = exec_targets(&procedure.body);
        if call_graph.insert(procedure.name.as_str(), callees).is_some() {
            return Err(ProgramError::DuplicateProcedure(procedure.name.clone()));
        }
    }

    let all_callees = call_graph
        .values()
        .flatten()
        .chain(exec_targets(&syntax_tree.main).iter())
        .copied()
        .collect_vec();
    if let Some(unknown) = all_callees.into_iter().find(|c| !call_graph.contains_key(c)) {
        return Err(ProgramError::UnknownProcedure(unknown.to_string()));
    }

    let mut finished = HashSet::new();
    for procedure in &syntax_tree.procedures {
        let mut on_path = vec![];
        ensure_acyclic(procedure.name.as_str(), &call_graph, &mut on_path, &mut finished)?;
    }

    Ok(())
}

fn ensure_acyclic<'a>(
    procedure: &'a str,
    call_graph: &HashMap<&'a str, HashSet<&'a str>>,
    on_path: &mut Vec<&'a str>,
    finished: &mut HashSet<&'a str>,
) -> Result<()> {
    if finished.contains(procedure) {
        return Ok(());
    }
    if on_path.contains(&procedure) {
        return Err(ProgramError::RecursiveProcedure(procedure.to_string()));
    }

    on_path.push(procedure);
    for &callee in call_graph.get(procedure).into_iter().flatten() {
        ensure_acyclic(callee, call_graph, on_path, finished)?;
    }
    on_path.pop();
    finished.insert(procedure);

    Ok(())
}

fn exec_targets(nodes: &[SourceNode]) -> HashSet<&str> {
    let mut targets = HashSet::new();
    for node in nodes {
        match node {
            SourceNode::Instruction(AnInstruction::Exec(target)) => {
                targets.insert(target.as_str());
            }
            SourceNode::Instruction(_) | SourceNode::Breakpoint => (),
            SourceNode::IfElse {
                then_branch,
                else_branch,
            } => {
                targets.extend(exec_targets(then_branch));
                targets.extend(exec_targets(else_branch));
            }
            SourceNode::While(body) | SourceNode::Repeat { body, .. } => {
                targets.extend(exec_targets(body));
            }
        }
    }
    targets
}

/// Turns structured control flow into labels, branches, and jumps. Generated
/// labels contain a `.`, which cannot appear in procedure names.
#[derive(Debug, Default)]
struct Lowering {
    labelled_instructions: Vec<LabelledInstruction>,
    num_instructions: usize,
    next_label_id: usize,
}

impl Lowering {
    fn fresh_label(&mut self, kind: &str) -> String {
        let label = format!("{kind}.{}", self.next_label_id);
        self.next_label_id += 1;
        label
    }

    fn emit(&mut self, labelled_instruction: LabelledInstruction) -> Result<()> {
        if let LabelledInstruction::Instruction(_) = labelled_instruction {
            self.num_instructions += 1;
            if self.num_instructions > MAX_PROGRAM_LENGTH {
                return Err(ProgramError::ProgramTooLong);
            }
        }
        self.labelled_instructions.push(labelled_instruction);
        Ok(())
    }

    fn emit_instruction(&mut self, instruction: AnInstruction<String>) -> Result<()> {
        self.emit(LabelledInstruction::Instruction(instruction))
    }

    fn lower_block(&mut self, nodes: &[SourceNode]) -> Result<()> {
        for node in nodes {
            self.lower_node(node)?;
        }
        Ok(())
    }

    fn lower_node(&mut self, node: &SourceNode) -> Result<()> {
        match node {
            SourceNode::Instruction(instruction) => self.emit_instruction(instruction.clone()),
            SourceNode::Breakpoint => self.emit(LabelledInstruction::Breakpoint),
            SourceNode::IfElse {
                then_branch,
                else_branch,
            } => self.lower_if_else(then_branch, else_branch),
            SourceNode::While(body) => self.lower_while(body),
            SourceNode::Repeat { count, body } => {
                for _ in 0..*count {
                    self.lower_block(body)?;
                }
                Ok(())
            }
        }
    }

    fn lower_if_else(
        &mut self,
        then_branch: &[SourceNode],
        else_branch: &[SourceNode],
    ) -> Result<()> {
        let else_label = self.fresh_label("else");
        let end_label = self.fresh_label("end_if");

        let target = if else_branch.is_empty() { &end_label } else { &else_label };
        self.emit_instruction(AnInstruction::Branch(target.clone()))?;
        self.lower_block(then_branch)?;
        if !else_branch.is_empty() {
            self.emit_instruction(AnInstruction::Jump(end_label.clone()))?;
            self.emit(LabelledInstruction::Label(else_label))?;
            self.lower_block(else_branch)?;
        }
        self.emit(LabelledInstruction::Label(end_label))
    }

    fn lower_while(&mut self, body: &[SourceNode]) -> Result<()> {
        let start_label = self.fresh_label("while");
        let end_label = self.fresh_label("end_while");

        self.emit(LabelledInstruction::Label(start_label.clone()))?;
        self.emit_instruction(AnInstruction::Branch(end_label.clone()))?;
        self.lower_block(body)?;
        self.emit_instruction(AnInstruction::Jump(start_label))?;
        self.emit(LabelledInstruction::Label(end_label))
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

    #[test]
    fn straight_line_program_has_no_control_flow() {
        let_assert!(Ok(program) = Program::from_code("begin push.1 push.2 add end"));
        let expected = vec![
            Instruction::Push(bfe!(1)),
            Instruction::Push(bfe!(2)),
            Instruction::Add,
        ];
        assert!(expected == program.instructions);
        assert!(0 == program.entry_point());
    }

    #[test]
    fn if_else_is_lowered_into_branch_and_jump() {
        let_assert!(Ok(program) = Program::from_code("begin if.true push.1 else push.2 end end"));
        let expected = vec![
            Instruction::Branch(3),
            Instruction::Push(bfe!(1)),
            Instruction::Jump(4),
            Instruction::Push(bfe!(2)),
        ];
        assert!(expected == program.instructions);
    }

    #[test]
    fn if_without_else_branches_past_then_block() {
        let_assert!(Ok(program) = Program::from_code("begin if.true push.1 end push.7 end"));
        let expected = vec![
            Instruction::Branch(2),
            Instruction::Push(bfe!(1)),
            Instruction::Push(bfe!(7)),
        ];
        assert!(expected == program.instructions);
    }

    #[test]
    fn while_loop_jumps_back_to_condition() {
        let_assert!(Ok(program) = Program::from_code("begin while.true push.0 end end"));
        let expected = vec![
            Instruction::Branch(3),
            Instruction::Push(bfe!(0)),
            Instruction::Jump(0),
        ];
        assert!(expected == program.instructions);
    }

    #[test]
    fn repeat_is_unrolled() {
        let_assert!(Ok(program) = Program::from_code("begin repeat.3 incr end end"));
        assert!(vec![Instruction::Incr; 3] == program.instructions);
    }

    #[test]
    fn procedures_precede_main_and_end_in_return() {
        let source = "proc.double dup add end begin push.2 exec.double end";
        let_assert!(Ok(program) = Program::from_code(source));
        let expected = vec![
            Instruction::Dup(crate::op_stack::OpStackElement::ST0),
            Instruction::Add,
            Instruction::Return,
            Instruction::Push(bfe!(2)),
            Instruction::Exec(0),
        ];
        assert!(expected == program.instructions);
        assert!(3 == program.entry_point());
        assert!("double" == program.label_for_address(0));
        assert!(ENTRY_LABEL == program.label_for_address(3));
    }

    #[test]
    fn breakpoint_marks_the_next_instruction() {
        let_assert!(Ok(program) = Program::from_code("begin push.1 breakpoint push.2 add end"));
        assert!(!program.is_breakpoint(0));
        assert!(program.is_breakpoint(1));
        assert!(!program.is_breakpoint(2));
        assert!(!program.is_breakpoint(3));
    }

    #[test]
    fn unknown_procedure_is_rejected() {
        let_assert!(Err(err) = Program::from_code("begin exec.missing end"));
        assert!(ProgramError::UnknownProcedure("missing".to_string()) == err);
    }

    #[test]
    fn duplicate_procedure_is_rejected() {
        let source = "proc.foo nop end proc.foo nop end begin exec.foo end";
        let_assert!(Err(err) = Program::from_code(source));
        assert!(ProgramError::DuplicateProcedure("foo".to_string()) == err);
    }

    #[test]
    fn mutually_recursive_procedures_are_rejected() {
        let source = "proc.ping exec.pong end proc.pong exec.ping end begin exec.ping end";
        let_assert!(Err(ProgramError::RecursiveProcedure(_)) = Program::from_code(source));
    }

    #[test]
    fn directly_recursive_procedure_is_rejected() {
        let source = "proc.loop if.true exec.loop end end begin exec.loop end";
        let_assert!(Err(err) = Program::from_code(source));
        assert!(ProgramError::RecursiveProcedure("loop".to_string()) == err);
    }

    #[test]
    fn parse_error_is_reported_with_context() {
        let_assert!(Err(ProgramError::Parse(message)) = Program::from_code("begin dup.99 end"));
        assert!(message.contains("dup index"));
    }

    #[test]
    fn labelled_instructions_with_missing_label_are_rejected() {
        let jump = AnInstruction::Jump("nowhere".to_string());
        let labelled_instructions = [LabelledInstruction::Instruction(jump)];
        let_assert!(Err(err) = Program::new(&labelled_instructions));
        assert!(ProgramError::MissingLabel("nowhere".to_string()) == err);
    }

    #[test]
    fn labelled_instructions_with_duplicate_label_are_rejected() {
        let label = LabelledInstruction::Label("here".to_string());
        let labelled_instructions = [label.clone(), label];
        let_assert!(Err(err) = Program::new(&labelled_instructions));
        assert!(ProgramError::DuplicateLabel("here".to_string()) == err);
    }

    #[test]
    fn too_much_unrolling_is_rejected() {
        let source = "begin repeat.65536 repeat.65536 nop end end end";
        let_assert!(Err(ProgramError::ProgramTooLong) = Program::from_code(source));
    }

    #[test]
    fn display_lists_labels_and_instructions() {
        let source = "proc.noop nop end begin breakpoint exec.noop end";
        let_assert!(Ok(program) = Program::from_code(source));
        let listing = program.to_string();
        assert!(listing.contains("noop:"));
        assert!(listing.contains("begin:"));
        assert!(listing.contains("breakpoint"));
        assert!(listing.contains("exec.noop"));
    }

    #[test]
    fn hash_depends_on_instructions() {
        let_assert!(Ok(program_0) = Program::from_code("begin push.1 end"));
        let_assert!(Ok(program_1) = Program::from_code("begin push.2 end"));
        assert!(program_0.hash() != program_1.hash());
    }

    #[test]
    fn hash_ignores_debug_information() {
        let_assert!(Ok(program_0) = Program::from_code("begin push.1 push.2 end"));
        let_assert!(Ok(program_1) = Program::from_code("begin push.1 breakpoint push.2 end"));
        assert!(program_0.hash() == program_1.hash());
    }

    #[proptest]
    fn bwords_contain_entry_point_and_every_opcode(#[strategy(1_usize..50)] num_pushes: usize) {
        let pushes = "push.1 ".repeat(num_pushes);
        let source = format!("begin {pushes}end");
        let program = Program::from_code(&source).unwrap();
        let bwords = program.to_bwords();
        prop_assert_eq!(1 + 2 * num_pushes, bwords.len());
        prop_assert_eq!(bfe!(0), bwords[0]);
    }
}
