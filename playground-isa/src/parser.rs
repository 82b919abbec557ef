use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::ops::RangeInclusive;

use nom::IResult;
use nom::Parser;
use nom::branch::alt;
use nom::bytes::complete::is_not;
use nom::bytes::complete::tag;
use nom::bytes::complete::take_while;
use nom::bytes::complete::take_while1;
use nom::character::complete::char;
use nom::character::complete::digit1;
use nom::character::complete::hex_digit1;
use nom::combinator::cut;
use nom::combinator::eof;
use nom::combinator::opt;
use nom::error::context;
use nom::multi::many0;
use nom::multi::many1;
use nom::multi::separated_list1;
use nom::sequence::preceded;
use nom_language::error::VerboseError;
use nom_language::error::VerboseErrorKind;
use twenty_first::prelude::BFieldElement;

use crate::instruction::ALL_INSTRUCTION_NAMES;
use crate::instruction::AnInstruction;

/// Words that delimit blocks or introduce declarations. Together with the
/// instruction names, they cannot be used as procedure names.
const KEYWORDS: [&str; 11] = [
    "begin",
    "end",
    "if",
    "else",
    "while",
    "repeat",
    "proc",
    "export",
    "exec",
    "breakpoint",
    "true",
];

/// The largest admissible `N` in `repeat.N`.
pub const MAX_REPEAT_COUNT: u64 = 1 << 16;

/// The number of hex digits of a constant that denotes an entire word.
const WORD_HEX_DIGITS: usize = 64;

#[derive(Debug, PartialEq)]
pub struct ParseError<'a> {
    pub input: &'a str,
    pub errors: VerboseError<&'a str>,
}

impl Display for ParseError<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let err_display = nom_language::error::convert_error(self.input, self.errors.clone());
        write!(f, "{err_display}")
    }
}

impl Error for ParseError<'_> {}

/// The structured form of a program's source code, before control flow is
/// lowered into jumps.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SyntaxTree {
    pub procedures: Vec<Procedure>,
    pub main: Vec<SourceNode>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Procedure {
    pub name: String,
    pub body: Vec<SourceNode>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SourceNode {
    Instruction(AnInstruction<String>),
    Breakpoint,
    IfElse {
        then_branch: Vec<SourceNode>,
        else_branch: Vec<SourceNode>,
    },
    While(Vec<SourceNode>),
    Repeat {
        count: u64,
        body: Vec<SourceNode>,
    },
}

/// Auxiliary type alias: `IResult` defaults to `nom::error::Error` as concrete
/// error type, but we want `VerboseError` as it allows `context()`.
type ParseResult<'input, Out> = IResult<&'input str, Out, VerboseError<&'input str>>;

/// Parse a program.
pub fn parse(input: &str) -> Result<SyntaxTree, ParseError<'_>> {
    match syntax_tree(input) {
        Ok((_, syntax_tree)) => Ok(syntax_tree),
        Err(nom::Err::Error(errors) | nom::Err::Failure(errors)) => {
            Err(ParseError { input, errors })
        }
        Err(nom::Err::Incomplete(_)) => {
            let end_of_input = &input[input.len()..];
            let errors = vec![(end_of_input, VerboseErrorKind::Context("unexpected end of input"))];
            let errors = VerboseError { errors };
            Err(ParseError { input, errors })
        }
    }
}

fn syntax_tree(s: &str) -> ParseResult<'_, SyntaxTree> {
    let (s, _) = comment_or_whitespace0(s)?;
    let (s, procedures) = many0(procedure).parse(s)?;
    let (s, _) = context("expected `begin`", token1("begin")).parse(s)?;
    let (s, main) = block_body(s)?;
    let (s, _) = context("expected `end` of program", cut(token1("end"))).parse(s)?;
    let (s, _) = context("expected end of file after program", eof).parse(s)?;

    Ok((s, SyntaxTree { procedures, main }))
}

fn procedure(s: &str) -> ParseResult<'_, Procedure> {
    let (s, _) = alt((tag("proc."), tag("export."))).parse(s)?;
    let (s, name) = cut(procedure_name).parse(s)?;
    let (s, _) = cut(end_of_token).parse(s)?;
    let (s, body) = block_body(s)?;
    let (s, _) = context("expected `end` of procedure", cut(token1("end"))).parse(s)?;

    Ok((s, Procedure { name, body }))
}

/// Parse the nodes of a block. Stops at the first token that is not a node,
/// which is usually `end` or `else`.
fn block_body(s: &str) -> ParseResult<'_, Vec<SourceNode>> {
    let (s, node_groups) = many0(node_group).parse(s)?;
    Ok((s, node_groups.into_iter().flatten().collect()))
}

/// Most source tokens turn into exactly one node. A `push` with several
/// constants turns into one node per constant.
fn node_group(s: &str) -> ParseResult<'_, Vec<SourceNode>> {
    alt((push_nodes, single_node)).parse(s)
}

fn single_node(s: &str) -> ParseResult<'_, Vec<SourceNode>> {
    let (s, node) =
        alt((if_else, while_loop, repeat, exec, breakpoint, instruction_node)).parse(s)?;
    Ok((s, vec![node]))
}

fn if_else(s: &str) -> ParseResult<'_, SourceNode> {
    let (s, _) = token1("if.true")(s)?;
    let (s, then_branch) = block_body(s)?;
    let (s, else_branch) = opt(preceded(token1("else"), block_body)).parse(s)?;
    let (s, _) = context("expected `end` of `if.true`", cut(token1("end"))).parse(s)?;

    let else_branch = else_branch.unwrap_or_default();
    let node = SourceNode::IfElse {
        then_branch,
        else_branch,
    };
    Ok((s, node))
}

fn while_loop(s: &str) -> ParseResult<'_, SourceNode> {
    let (s, _) = token1("while.true")(s)?;
    let (s, body) = block_body(s)?;
    let (s, _) = context("expected `end` of `while.true`", cut(token1("end"))).parse(s)?;

    Ok((s, SourceNode::While(body)))
}

fn repeat(s: &str) -> ParseResult<'_, SourceNode> {
    let (s, _) = tag("repeat.")(s)?;
    let (s, count) = cut(context("expected a repetition count", integer)).parse(s)?;
    if !(1..=MAX_REPEAT_COUNT).contains(&count) {
        return fail(s, "repetition count must be in range 1..=65536");
    }
    let (s, _) = cut(end_of_token).parse(s)?;
    let (s, body) = block_body(s)?;
    let (s, _) = context("expected `end` of `repeat`", cut(token1("end"))).parse(s)?;

    Ok((s, SourceNode::Repeat { count, body }))
}

fn exec(s: &str) -> ParseResult<'_, SourceNode> {
    let (s, _) = tag("exec.")(s)?;
    let (s, name) = cut(procedure_name).parse(s)?;
    let (s, _) = cut(end_of_token).parse(s)?;

    Ok((s, SourceNode::Instruction(AnInstruction::Exec(name))))
}

fn breakpoint(s: &str) -> ParseResult<'_, SourceNode> {
    let (s, _) = token1("breakpoint")(s)?;
    Ok((s, SourceNode::Breakpoint))
}

fn push_nodes(s: &str) -> ParseResult<'_, Vec<SourceNode>> {
    let (s, _) = tag("push.")(s)?;
    let (s, constants) = cut(separated_list1(char('.'), constant)).parse(s)?;
    let (s, _) = cut(end_of_token).parse(s)?;

    let nodes = constants
        .into_iter()
        .flatten()
        .map(|c| SourceNode::Instruction(AnInstruction::Push(c)))
        .collect();
    Ok((s, nodes))
}

fn instruction_node(s: &str) -> ParseResult<'_, SourceNode> {
    let (s, instruction) = an_instruction(s)?;
    Ok((s, SourceNode::Instruction(instruction)))
}

fn an_instruction(s: &str) -> ParseResult<'_, AnInstruction<String>> {
    // Field arithmetic
    let add = with_field_immediate("add", AnInstruction::Add, AnInstruction::AddImm);
    let sub = with_field_immediate("sub", AnInstruction::Sub, AnInstruction::SubImm);
    let mul = with_field_immediate("mul", AnInstruction::Mul, AnInstruction::MulImm);
    let div = with_field_immediate("div", AnInstruction::Div, AnInstruction::DivImm);
    let neg = instruction("neg", AnInstruction::Neg);
    let inv = instruction("inv", AnInstruction::Inv);
    let incr = instruction("incr", AnInstruction::Incr);
    let pow2 = instruction("pow2", AnInstruction::Pow2);
    let exp = instruction("exp", AnInstruction::Exp);

    let field_arithmetic = alt((add, sub, mul, div, neg, inv, incr, pow2, exp));

    // Comparison
    let eq = with_field_immediate("eq", AnInstruction::Eq, AnInstruction::EqImm);
    let neq = with_field_immediate("neq", AnInstruction::Neq, AnInstruction::NeqImm);
    let lte = instruction("lte", AnInstruction::Lte);
    let lt = instruction("lt", AnInstruction::Lt);
    let gte = instruction("gte", AnInstruction::Gte);
    let gt = instruction("gt", AnInstruction::Gt);
    let is_odd = instruction("is_odd", AnInstruction::IsOdd);
    let eqw = instruction("eqw", AnInstruction::EqW);

    let comparison = alt((eq, neq, lte, lt, gte, gt, is_odd, eqw));

    // Boolean
    let not = instruction("not", AnInstruction::Not);
    let and = instruction("and", AnInstruction::And);
    let or = instruction("or", AnInstruction::Or);
    let xor = instruction("xor", AnInstruction::Xor);

    let boolean = alt((not, and, or, xor));

    // Stack manipulation
    let drop = instruction("drop", AnInstruction::Drop);
    let dropw = instruction("dropw", AnInstruction::DropW);
    let padw = instruction("padw", AnInstruction::PadW);
    let dup = indexed(
        "dup",
        Some(0),
        0..=15,
        "dup index must be in range 0..=15",
        AnInstruction::Dup,
    );
    let dupw = indexed(
        "dupw",
        Some(0),
        0..=3,
        "dupw index must be in range 0..=3",
        AnInstruction::DupW,
    );
    let swap = indexed(
        "swap",
        Some(1),
        1..=15,
        "swap index must be in range 1..=15",
        AnInstruction::Swap,
    );
    let swapw = indexed(
        "swapw",
        Some(1),
        1..=3,
        "swapw index must be in range 1..=3",
        AnInstruction::SwapW,
    );
    let swapdw = instruction("swapdw", AnInstruction::SwapDW);
    let movup = indexed(
        "movup",
        None,
        2..=15,
        "movup index must be in range 2..=15",
        AnInstruction::MovUp,
    );
    let movdn = indexed(
        "movdn",
        None,
        2..=15,
        "movdn index must be in range 2..=15",
        AnInstruction::MovDn,
    );
    let movupw = indexed(
        "movupw",
        None,
        2..=3,
        "movupw index must be in range 2..=3",
        AnInstruction::MovUpW,
    );
    let movdnw = indexed(
        "movdnw",
        None,
        2..=3,
        "movdnw index must be in range 2..=3",
        AnInstruction::MovDnW,
    );
    let cswap = instruction("cswap", AnInstruction::CSwap);
    let cswapw = instruction("cswapw", AnInstruction::CSwapW);
    let cdrop = instruction("cdrop", AnInstruction::CDrop);
    let cdropw = instruction("cdropw", AnInstruction::CDropW);

    let stack_manipulation = alt((
        drop, dropw, padw, dup, dupw, swap, swapw, swapdw, movup, movdn, movupw, movdnw, cswap,
        cswapw, cdrop, cdropw,
    ));

    // Random access memory
    let mem_load = with_address("mem_load", AnInstruction::MemLoad, AnInstruction::MemLoadImm);
    let mem_loadw = with_address("mem_loadw", AnInstruction::MemLoadW, AnInstruction::MemLoadWImm);
    let mem_store = with_address("mem_store", AnInstruction::MemStore, AnInstruction::MemStoreImm);
    let mem_storew =
        with_address("mem_storew", AnInstruction::MemStoreW, AnInstruction::MemStoreWImm);

    let memory = alt((mem_load, mem_loadw, mem_store, mem_storew));

    // Non-deterministic input
    let adv_push = indexed(
        "adv_push",
        None,
        1..=16,
        "adv_push count must be in 1..=16",
        AnInstruction::AdvPush,
    );
    let adv_loadw = instruction("adv_loadw", AnInstruction::AdvLoadW);
    let adv_push_mapval = instruction("adv.push_mapval", AnInstruction::AdvPushMapVal);
    let adv_push_mtnode = instruction("adv.push_mtnode", AnInstruction::AdvPushMtNode);

    let advice = alt((adv_push, adv_loadw, adv_push_mapval, adv_push_mtnode));

    // Environment
    let sdepth = instruction("sdepth", AnInstruction::SDepth);
    let clk = instruction("clk", AnInstruction::Clk);

    // Hashing and Merkle trees
    let hash = instruction("hash", AnInstruction::Hash);
    let hmerge = instruction("hmerge", AnInstruction::HMerge);
    let hperm = instruction("hperm", AnInstruction::HPerm);
    let mtree_get = instruction("mtree_get", AnInstruction::MTreeGet);
    let mtree_set = instruction("mtree_set", AnInstruction::MTreeSet);
    let mtree_cwm = instruction("mtree_cwm", AnInstruction::MTreeCwm);
    let mtree_merge = instruction("mtree_merge", AnInstruction::MTreeMerge);
    let mtree_verify = instruction("mtree_verify", AnInstruction::MTreeVerify);

    let crypto = alt((
        hash,
        hmerge,
        hperm,
        mtree_get,
        mtree_set,
        mtree_cwm,
        mtree_merge,
        mtree_verify,
    ));

    // Assertions
    let assert = instruction("assert", AnInstruction::Assert);
    let assertz = instruction("assertz", AnInstruction::AssertZ);
    let assert_eq = instruction("assert_eq", AnInstruction::AssertEq);
    let assert_eqw = instruction("assert_eqw", AnInstruction::AssertEqW);

    let assertions = alt((assert, assertz, assert_eq, assert_eqw));

    let nop = instruction("nop", AnInstruction::Nop);

    alt((
        field_arithmetic,
        comparison,
        boolean,
        stack_manipulation,
        memory,
        advice,
        sdepth,
        clk,
        crypto,
        assertions,
        nop,
    ))
    .parse(s)
}

fn instruction<'a>(
    name: &'a str,
    instruction: AnInstruction<String>,
) -> impl Fn(&'a str) -> ParseResult<'a, AnInstruction<String>> {
    move |s: &'a str| {
        let (s, _) = token1(name)(s)?;
        Ok((s, instruction.clone()))
    }
}

/// An instruction that takes an optional field element as immediate argument,
/// like `add` and `add.5`.
fn with_field_immediate<'a>(
    name: &'a str,
    plain: AnInstruction<String>,
    with_immediate: fn(BFieldElement) -> AnInstruction<String>,
) -> impl Fn(&'a str) -> ParseResult<'a, AnInstruction<String>> {
    move |s: &'a str| {
        let (s, _) = tag(name)(s)?;
        let (s, immediate) = opt(preceded(char('.'), cut(field_element))).parse(s)?;
        let Some(immediate) = immediate else {
            let (s, _) = end_of_token(s)?;
            return Ok((s, plain.clone()));
        };
        let (s, _) = cut(end_of_token).parse(s)?;
        Ok((s, with_immediate(immediate)))
    }
}

/// A memory instruction that takes an optional address as immediate argument,
/// like `mem_load` and `mem_load.5`.
fn with_address<'a>(
    name: &'a str,
    plain: AnInstruction<String>,
    with_address: fn(u32) -> AnInstruction<String>,
) -> impl Fn(&'a str) -> ParseResult<'a, AnInstruction<String>> {
    move |s: &'a str| {
        let (s, _) = tag(name)(s)?;
        let (s, address) = opt(preceded(char('.'), cut(memory_address))).parse(s)?;
        let Some(address) = address else {
            let (s, _) = end_of_token(s)?;
            return Ok((s, plain.clone()));
        };
        let (s, _) = cut(end_of_token).parse(s)?;
        Ok((s, with_address(address)))
    }
}

/// An instruction with a small index argument, like `dup.3` or `movup.2`. If
/// `default` is `None`, the argument is mandatory.
fn indexed<'a, T: TryFrom<u64>>(
    name: &'a str,
    default: Option<u64>,
    legal_range: RangeInclusive<u64>,
    out_of_range_context: &'static str,
    to_instruction: fn(T) -> AnInstruction<String>,
) -> impl Fn(&'a str) -> ParseResult<'a, AnInstruction<String>> {
    move |s_orig: &'a str| {
        let (s, _) = tag(name)(s_orig)?;
        let (s, index) = opt(preceded(char('.'), cut(integer))).parse(s)?;
        let (s, index) = match (index, default) {
            (Some(index), _) => (cut(end_of_token).parse(s)?.0, index),
            (None, Some(default)) => (end_of_token(s)?.0, default),
            (None, None) => {
                let (s, _) = end_of_token(s)?;
                return fail(s, "instruction requires an argument");
            }
        };
        if !legal_range.contains(&index) {
            return fail(s, out_of_range_context);
        }
        let Ok(arg) = T::try_from(index) else {
            return fail(s, out_of_range_context);
        };
        Ok((s, to_instruction(arg)))
    }
}

/// One or, in case of a 32-byte hex constant, four field elements. The
/// elements of a word are returned in push order, such that the word's first
/// element ends up on top of the stack.
fn constant(s: &str) -> ParseResult<'_, Vec<BFieldElement>> {
    alt((hex_constant, map_single(decimal_field_element))).parse(s)
}

fn map_single<'a, P>(parser: P) -> impl Fn(&'a str) -> ParseResult<'a, Vec<BFieldElement>>
where
    P: Fn(&'a str) -> ParseResult<'a, BFieldElement>,
{
    move |s: &'a str| {
        let (s, element) = parser(s)?;
        Ok((s, vec![element]))
    }
}

fn hex_constant(s: &str) -> ParseResult<'_, Vec<BFieldElement>> {
    let (s, _) = tag("0x")(s)?;
    let (s, digits) = cut(context("expected hex digits", hex_digit1)).parse(s)?;

    if digits.len() == WORD_HEX_DIGITS {
        let mut bytes = [0_u8; WORD_HEX_DIGITS / 2];
        if hex::decode_to_slice(digits, &mut bytes).is_err() {
            return fail(s, "invalid hex word");
        }
        let mut word = Vec::with_capacity(4);
        for chunk in bytes.chunks_exact(8) {
            let Some(element) = hex_word_element(chunk) else {
                return fail(s, "word element must be smaller than the field modulus");
            };
            word.push(element);
        }
        word.reverse();
        return Ok((s, word));
    }

    if digits.len() > 16 {
        return fail(s, "hex constant must have at most 16 or exactly 64 digits");
    }
    let Ok(value) = u64::from_str_radix(digits, 16) else {
        return fail(s, "invalid hex constant");
    };
    let Some(element) = canonical_element(value) else {
        return fail(s, "constant must be smaller than the field modulus");
    };
    Ok((s, vec![element]))
}

/// Interpret one 8-byte chunk of a decoded word as a little-endian element.
fn hex_word_element(chunk: &[u8]) -> Option<BFieldElement> {
    let bytes = chunk.try_into().ok()?;
    canonical_element(u64::from_le_bytes(bytes))
}

fn canonical_element(value: u64) -> Option<BFieldElement> {
    (value < BFieldElement::P).then(|| BFieldElement::new(value))
}

fn field_element(s: &str) -> ParseResult<'_, BFieldElement> {
    let (s, mut elements) = alt((hex_constant, map_single(decimal_field_element))).parse(s)?;
    if elements.len() != 1 {
        return fail(s, "expected a single field element, not a word");
    }
    let Some(element) = elements.pop() else {
        return fail(s, "expected a field element");
    };
    Ok((s, element))
}

fn decimal_field_element(s: &str) -> ParseResult<'_, BFieldElement> {
    let (s, value) = integer(s)?;
    let Some(element) = canonical_element(value) else {
        return fail(s, "constant must be smaller than the field modulus");
    };
    Ok((s, element))
}

fn memory_address(s: &str) -> ParseResult<'_, u32> {
    let (s, address) = alt((hex_u64, integer)).parse(s)?;
    let Ok(address) = u32::try_from(address) else {
        return fail(s, "memory address must be smaller than 2^32");
    };
    Ok((s, address))
}

fn hex_u64(s: &str) -> ParseResult<'_, u64> {
    let (s, _) = tag("0x")(s)?;
    let (s, digits) = cut(context("expected hex digits", hex_digit1)).parse(s)?;
    let Ok(value) = u64::from_str_radix(digits, 16) else {
        return fail(s, "hex value is too large");
    };
    Ok((s, value))
}

fn integer(s: &str) -> ParseResult<'_, u64> {
    let (s, digits) = context("expected a decimal number", digit1).parse(s)?;
    let Ok(value) = digits.parse() else {
        return fail(s, "number is too large");
    };
    Ok((s, value))
}

fn procedure_name(s: &str) -> ParseResult<'_, String> {
    let (s, head) = context(
        "procedure name must start with an alphabetic character or `_`",
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
    )
    .parse(s)?;
    let (s, tail) = take_while(|c: char| c.is_alphanumeric() || c == '_').parse(s)?;

    let name = format!("{head}{tail}");
    if ALL_INSTRUCTION_NAMES.contains(&name.as_str()) || KEYWORDS.contains(&name.as_str()) {
        return fail(s, "procedure name must be neither instruction nor keyword");
    }
    Ok((s, name))
}

fn fail<'a, T>(s: &'a str, fail_context: &'static str) -> ParseResult<'a, T> {
    let errors = vec![(s, VerboseErrorKind::Context(fail_context))];
    Err(nom::Err::Failure(VerboseError { errors }))
}

/// Tokens end in whitespace, a comment, or the end of the input.
fn end_of_token(s: &str) -> ParseResult<'_, ()> {
    let (s, _) = comment_or_whitespace1(s)?;
    Ok((s, ()))
}

/// Parse 0 or more comments and/or whitespace.
fn comment_or_whitespace0(s: &str) -> ParseResult<'_, &str> {
    let (s, _) = many0(alt((comment1, whitespace1))).parse(s)?;
    Ok((s, ""))
}

/// Parse at least one comment and/or whitespace, or [eof].
fn comment_or_whitespace1<'a>(s: &'a str) -> ParseResult<'a, &'a str> {
    let cws1 = |s: &'a str| -> ParseResult<'a, &'a str> {
        let (s, _) = many1(alt((comment1, whitespace1))).parse(s)?;
        Ok((s, ""))
    };
    alt((eof, cws1)).parse(s)
}

/// Parse one “#”-comment, not including the linebreak.
fn comment1(s: &str) -> ParseResult<'_, ()> {
    let (s, _) = tag("#").parse(s)?;
    let (s, _) = opt(is_not("\n\r")).parse(s)?;
    Ok((s, ()))
}

/// Parse at least one whitespace character
fn whitespace1(s: &str) -> ParseResult<'_, ()> {
    let (s, _) = take_while1(char::is_whitespace)(s)?;
    Ok((s, ()))
}

/// `token1(tok)` will parse the string `tok` and munch at least one comment
/// and/or whitespace, or eof.
fn token1<'a>(token: &'a str) -> impl Fn(&'a str) -> ParseResult<'a, ()> {
    move |s: &'a str| {
        let (s, _) = tag(token)(s)?;
        let (s, _) = comment_or_whitespace1(s)?;
        Ok((s, ()))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
pub(crate) mod tests {
    use assert2::assert;
    use assert2::let_assert;
    use proptest::prelude::*;
    use test_strategy::proptest;
    use twenty_first::bfe;

    use super::*;
    use crate::op_stack::NumberOfElements;
    use crate::op_stack::OpStackElement;
    use crate::op_stack::WordIndex;

    fn main_instructions(source: &str) -> Vec<AnInstruction<String>> {
        let_assert!(Ok(syntax_tree) = parse(source));
        syntax_tree
            .main
            .into_iter()
            .map(|node| {
                let SourceNode::Instruction(instruction) = node else {
                    panic!("expected only instructions, got {node:?}");
                };
                instruction
            })
            .collect()
    }

    fn assert_parse_failure(source: &str, expected_context: &str) {
        let_assert!(Err(err) = parse(source));
        let message = err.to_string();
        assert!(message.contains(expected_context), "source: {source}");
    }

    #[test]
    fn parse_simplest_program() {
        let instructions = main_instructions("begin push.1 push.2 add end");
        let expected = vec![
            AnInstruction::Push(bfe!(1)),
            AnInstruction::Push(bfe!(2)),
            AnInstruction::Add,
        ];
        assert!(expected == instructions);
    }

    #[test]
    fn push_with_several_constants_expands_into_several_pushes() {
        let instructions = main_instructions("begin push.1.2.0x10 end");
        let expected = vec![
            AnInstruction::Push(bfe!(1)),
            AnInstruction::Push(bfe!(2)),
            AnInstruction::Push(bfe!(16)),
        ];
        assert!(expected == instructions);
    }

    #[test]
    fn hex_word_is_pushed_such_that_first_element_ends_up_on_top() {
        let word = "0100000000000000\
                    0200000000000000\
                    0300000000000000\
                    0400000000000000";
        let instructions = main_instructions(&format!("begin push.0x{word} end"));
        let expected = vec![
            AnInstruction::Push(bfe!(4)),
            AnInstruction::Push(bfe!(3)),
            AnInstruction::Push(bfe!(2)),
            AnInstruction::Push(bfe!(1)),
        ];
        assert!(expected == instructions);
    }

    #[test]
    fn hex_word_elements_must_be_canonical() {
        let word = format!("{}{}", "ff".repeat(8), "0".repeat(48));
        assert_parse_failure(&format!("begin push.0x{word} end"), "smaller than the field");
    }

    #[test]
    fn immediate_variants_are_recognized() {
        let source = "begin add add.3 sub.1 mul.2 div.4 eq eq.0 neq.7 mem_load mem_load.9 \
                      mem_storew.0x10 end";
        let expected = vec![
            AnInstruction::Add,
            AnInstruction::AddImm(bfe!(3)),
            AnInstruction::SubImm(bfe!(1)),
            AnInstruction::MulImm(bfe!(2)),
            AnInstruction::DivImm(bfe!(4)),
            AnInstruction::Eq,
            AnInstruction::EqImm(bfe!(0)),
            AnInstruction::NeqImm(bfe!(7)),
            AnInstruction::MemLoad,
            AnInstruction::MemLoadImm(9),
            AnInstruction::MemStoreWImm(16),
        ];
        assert!(expected == main_instructions(source));
    }

    #[test]
    fn instructions_sharing_a_prefix_are_distinguished() {
        let source = "begin eq eqw lt lte gt gte drop dropw mem_load mem_loadw assert assertz \
                      assert_eq assert_eqw cswap cswapw cdrop cdropw swap swapw swapdw end";
        let expected = vec![
            AnInstruction::Eq,
            AnInstruction::EqW,
            AnInstruction::Lt,
            AnInstruction::Lte,
            AnInstruction::Gt,
            AnInstruction::Gte,
            AnInstruction::Drop,
            AnInstruction::DropW,
            AnInstruction::MemLoad,
            AnInstruction::MemLoadW,
            AnInstruction::Assert,
            AnInstruction::AssertZ,
            AnInstruction::AssertEq,
            AnInstruction::AssertEqW,
            AnInstruction::CSwap,
            AnInstruction::CSwapW,
            AnInstruction::CDrop,
            AnInstruction::CDropW,
            AnInstruction::Swap(OpStackElement::ST1),
            AnInstruction::SwapW(WordIndex::W1),
            AnInstruction::SwapDW,
        ];
        assert!(expected == main_instructions(source));
    }

    #[test]
    fn stack_indices_have_defaults_where_sensible() {
        let source = "begin dup dup.15 dupw dupw.3 swap.15 swapw.3 movup.2 movdnw.3 adv_push.16 end";
        let_assert!(Ok(sixteen) = NumberOfElements::try_from(16_u64));
        let expected = vec![
            AnInstruction::Dup(OpStackElement::ST0),
            AnInstruction::Dup(OpStackElement::ST15),
            AnInstruction::DupW(WordIndex::W0),
            AnInstruction::DupW(WordIndex::W3),
            AnInstruction::Swap(OpStackElement::ST15),
            AnInstruction::SwapW(WordIndex::W3),
            AnInstruction::MovUp(OpStackElement::ST2),
            AnInstruction::MovDnW(WordIndex::W3),
            AnInstruction::AdvPush(sixteen),
        ];
        assert!(expected == main_instructions(source));
    }

    #[test]
    fn comments_are_ignored() {
        let source = "# leading comment\nbegin # trailing\n  push.1 # one\n  drop\nend # done";
        let expected = vec![AnInstruction::Push(bfe!(1)), AnInstruction::Drop];
        assert!(expected == main_instructions(source));
    }

    #[test]
    fn parse_structured_control_flow() {
        let source = "begin
            push.1
            if.true push.2 else push.3 end
            while.true push.0 end
            repeat.3 breakpoint nop end
        end";
        let_assert!(Ok(syntax_tree) = parse(source));
        let_assert!([_, if_else, while_loop, repeat] = syntax_tree.main.as_slice());

        let_assert!(SourceNode::IfElse { then_branch, else_branch } = if_else);
        assert!(1 == then_branch.len());
        assert!(1 == else_branch.len());

        let_assert!(SourceNode::While(body) = while_loop);
        assert!(1 == body.len());

        let_assert!(SourceNode::Repeat { count: 3, body } = repeat);
        assert!([SourceNode::Breakpoint, SourceNode::Instruction(AnInstruction::Nop)] == body[..]);
    }

    #[test]
    fn if_without_else_has_empty_else_branch() {
        let_assert!(Ok(syntax_tree) = parse("begin if.true push.1 end end"));
        let_assert!([SourceNode::IfElse { else_branch, .. }] = syntax_tree.main.as_slice());
        assert!(else_branch.is_empty());
    }

    #[test]
    fn parse_procedures() {
        let source = "proc.double dup add end export.triple dup dup add add end
                      begin push.2 exec.double exec.triple end";
        let_assert!(Ok(syntax_tree) = parse(source));
        let names = syntax_tree.procedures.iter().map(|p| p.name.as_str()).collect::<Vec<_>>();
        assert!(vec!["double", "triple"] == names);
        assert!(3 == syntax_tree.main.len());
    }

    #[test]
    fn merkle_and_advice_instructions_are_recognized() {
        let source = "begin adv.push_mapval adv.push_mtnode adv_loadw mtree_get mtree_set \
                      mtree_cwm mtree_merge mtree_verify hash hmerge hperm end";
        let expected = vec![
            AnInstruction::AdvPushMapVal,
            AnInstruction::AdvPushMtNode,
            AnInstruction::AdvLoadW,
            AnInstruction::MTreeGet,
            AnInstruction::MTreeSet,
            AnInstruction::MTreeCwm,
            AnInstruction::MTreeMerge,
            AnInstruction::MTreeVerify,
            AnInstruction::Hash,
            AnInstruction::HMerge,
            AnInstruction::HPerm,
        ];
        assert!(expected == main_instructions(source));
    }

    #[test]
    fn constant_at_field_modulus_is_rejected() {
        let p = BFieldElement::P;
        assert_parse_failure(&format!("begin push.{p} end"), "field modulus");
        assert!(parse(&format!("begin push.{} end", p - 1)).is_ok());
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        assert_parse_failure("begin dup.16 end", "dup index");
        assert_parse_failure("begin swap.0 end", "swap index");
        assert_parse_failure("begin movup.1 end", "movup index");
        assert_parse_failure("begin movupw.4 end", "movupw index");
        assert_parse_failure("begin adv_push.17 end", "adv_push count");
        assert_parse_failure("begin movup end", "requires an argument");
    }

    #[test]
    fn memory_address_immediate_must_fit_in_u32() {
        assert_parse_failure("begin mem_load.4294967296 end", "2^32");
        assert!(parse("begin mem_load.4294967295 end").is_ok());
    }

    #[test]
    fn word_constant_is_no_immediate() {
        let word = "0".repeat(64);
        assert_parse_failure(&format!("begin add.0x{word} end"), "single field element");
    }

    #[test]
    fn procedure_names_must_not_be_keywords() {
        assert_parse_failure("proc.add push.1 end begin end", "neither instruction nor keyword");
        assert_parse_failure("proc.begin push.1 end begin end", "neither instruction nor keyword");
    }

    #[test]
    fn repetition_count_must_be_positive() {
        assert_parse_failure("begin repeat.0 nop end end", "repetition count");
    }

    #[test]
    fn truncated_programs_are_rejected_without_panicking() {
        for source in ["begin push.1", "begin push.", "begin push", "proc.foo", "begin if.true"] {
            let_assert!(Err(err) = parse(source));
            assert!(!err.to_string().is_empty(), "source: {source}");
        }
    }

    #[test]
    fn unknown_instruction_is_rejected() {
        assert!(parse("begin frobnicate end").is_err());
        assert!(parse("begin push.1").is_err());
        assert!(parse("push.1 end").is_err());
        assert!(parse("begin end trailing").is_err());
    }

    #[proptest]
    fn any_canonical_decimal_constant_parses(#[strategy(0..BFieldElement::P)] value: u64) {
        let source = format!("begin push.{value} end");
        let instructions = main_instructions(&source);
        prop_assert_eq!(vec![AnInstruction::Push(bfe!(value))], instructions);
    }

    #[proptest]
    fn any_u32_memory_address_parses(address: u32) {
        let source = format!("begin mem_storew.{address} end");
        let instructions = main_instructions(&source);
        prop_assert_eq!(vec![AnInstruction::MemStoreWImm(address)], instructions);
    }
}
