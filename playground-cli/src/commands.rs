use std::io::BufRead;
use std::io::Write;
use std::path::Path;

use color_eyre::eyre::Result;
use color_eyre::eyre::bail;
use colored::Colorize;
use itertools::Itertools;
use tracing::info;
use tracing::warn;
use vm::debugger::DebugOutput;
use vm::debugger::DebugState;
use vm::debugger::MemoryEntry;
use vm::error::PlaygroundError;
use vm::io::Outputs;
use vm::prelude::*;

use crate::args::ProgramArgs;
use crate::config::Config;

const QUIT_COMMANDS: [&str; 3] = ["quit", "exit", "q"];

/// The program's source code and its inputs as JSON, read from disk.
struct Sources {
    code: String,
    inputs_json: String,
}

impl Sources {
    fn read(program_args: &ProgramArgs) -> Result<Self> {
        let code = fs_err::read_to_string(&program_args.program)?;
        let inputs_json = match &program_args.inputs {
            Some(path) => fs_err::read_to_string(path)?,
            None => String::new(),
        };
        Ok(Self { code, inputs_json })
    }
}

fn outputs_to_json(outputs: &Outputs, config: &Config) -> Result<String> {
    let json = if config.pretty {
        serde_json::to_string_pretty(outputs)?
    } else {
        serde_json::to_string(outputs)?
    };
    Ok(json)
}

pub(crate) fn run(program_args: &ProgramArgs, config: &Config) -> Result<()> {
    let sources = Sources::read(program_args)?;
    let options = ExecutionOptions {
        max_cycles: config.max_cycles(program_args),
    };
    let outputs = vm::run_with_options(&sources.code, &sources.inputs_json, options)?;
    info!(trace_len = outputs.trace_len, "execution finished");
    println!("{}", outputs_to_json(&outputs, config)?);
    Ok(())
}

pub(crate) fn prove(
    program_args: &ProgramArgs,
    output: Option<&Path>,
    config: &Config,
) -> Result<()> {
    let sources = Sources::read(program_args)?;
    if program_args.max_cycles.is_some() || config.max_cycles.is_some() {
        warn!("cycle limits apply to `run` and `debug` only");
    }
    let outputs = vm::prove(&sources.code, &sources.inputs_json)?;
    let json = outputs_to_json(&outputs, config)?;
    match output {
        Some(path) => {
            fs_err::write(path, json)?;
            eprintln!("{} {}", "outputs and proof written to".green(), path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

pub(crate) fn verify(program_args: &ProgramArgs, outputs_path: &Path) -> Result<()> {
    let sources = Sources::read(program_args)?;
    let outputs_json = fs_err::read_to_string(outputs_path)?;
    verify_outputs(&sources, &outputs_json, outputs_path)?;
    println!("{}", "proof is valid".green().bold());
    Ok(())
}

/// Fails unless the outputs are well-formed, carry a proof, and the proof is
/// valid.
fn verify_outputs(sources: &Sources, outputs_json: &str, outputs_path: &Path) -> Result<()> {
    let outputs = Outputs::from_checked_json(outputs_json).map_err(PlaygroundError::from)?;
    let Some(proof) = outputs.proof else {
        bail!("{} contains no proof", outputs_path.display());
    };
    let is_valid = vm::verify(&sources.code, &sources.inputs_json, outputs_json, &proof)?;
    if !is_valid {
        bail!("proof is invalid");
    }
    Ok(())
}

pub(crate) fn debug(program_args: &ProgramArgs, config: &Config) -> Result<()> {
    let sources = Sources::read(program_args)?;
    let program = Program::from_code(&sources.code).map_err(PlaygroundError::from)?;
    let inputs = Inputs::from_json(&sources.inputs_json).map_err(PlaygroundError::from)?;
    let options = ExecutionOptions {
        max_cycles: config.max_cycles(program_args),
    };
    let initial_state = inputs.initial_state(program).with_options(options);
    let mut executor = DebugExecutor::from_state(initial_state);

    let stdin = std::io::stdin().lock();
    let stdout = std::io::stdout().lock();
    debug_session(&mut executor, stdin, stdout)
}

/// Reads debug commands line by line until the input ends or the user quits.
/// Failing commands are reported and the session carries on.
pub(crate) fn debug_session(
    executor: &mut DebugExecutor,
    input: impl BufRead,
    mut output: impl Write,
) -> Result<()> {
    writeln!(output, "{}", render_state(&executor.print_state()))?;
    for line in input.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if QUIT_COMMANDS.contains(&line) {
            break;
        }

        let command_output = line
            .parse::<DebugCommand>()
            .and_then(|command| executor.execute(command));
        match command_output {
            Ok(debug_output) => writeln!(output, "{}", render(&debug_output))?,
            Err(err) => writeln!(output, "{} {err}", "error:".red().bold())?,
        }
    }
    Ok(())
}

fn render(debug_output: &DebugOutput) -> String {
    match debug_output {
        DebugOutput::State(state) => render_state(state),
        DebugOutput::Stack(stack) => render_stack(stack),
        DebugOutput::Memory(memory) => render_memory(memory),
        DebugOutput::MemoryEntry(entry) => render_memory_entry(entry),
        DebugOutput::Clock(clk) => format!("{} {clk}", "clk:".bold()),
    }
}

fn render_state(state: &DebugState) -> String {
    let position = match (state.operation_index, state.num_of_operations) {
        (Some(index), Some(num_operations)) => format!(" ({index}/{num_operations})"),
        _ => String::new(),
    };
    let instruction = match &state.instruction {
        Some(instruction) => instruction.cyan().to_string(),
        None => "halted".dimmed().to_string(),
    };

    let mut lines = vec![
        format!("{} {}", "clk:".bold(), state.clk),
        format!("{} {instruction}{position}", "next:".bold()),
        render_stack(&state.stack),
    ];
    if !state.memory.is_empty() {
        lines.push(render_memory(&state.memory));
    }
    if let Some(err) = &state.error {
        lines.push(format!("{} {err}", "error:".red().bold()));
    }
    lines.join("\n")
}

fn render_stack(stack: &[u64]) -> String {
    format!("{} [{}]", "stack:".bold(), stack.iter().join(", "))
}

fn render_memory(memory: &[MemoryEntry]) -> String {
    if memory.is_empty() {
        return format!("{} (empty)", "memory:".bold());
    }
    let entries = memory.iter().map(|entry| format!("  {}", render_memory_entry(entry)));
    std::iter::once("memory:".bold().to_string())
        .chain(entries)
        .join("\n")
}

fn render_memory_entry(entry: &MemoryEntry) -> String {
    format!("{}: [{}]", entry.address, entry.word.iter().join(", "))
}
