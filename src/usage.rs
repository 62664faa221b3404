use crate::program::{Instruction, OptionAction, Program};

// Help output renders against the attached terminal, within reason.
const FALLBACK_WIDTH: usize = 100;
const PADDING: usize = 3;

pub(crate) fn terminal_width() -> usize {
    match terminal_size::terminal_size() {
        Some((width, _)) => width.0 as usize,
        None => FALLBACK_WIDTH,
    }
}

/// Render the usage line by re-reading the compiled program:
/// options as `[-x|--xxx SHAPE]`, optional groups bracketed (early-mapped
/// options leading), var-positionals as `[name]...`.
pub(crate) fn usage_line(path: &str, program: &Program) -> String {
    let pieces = walk(program, 0, program.main_length);

    if pieces.is_empty() {
        format!("usage: {path}")
    } else {
        format!("usage: {path} {}", pieces.join(" "))
    }
}

fn walk(program: &Program, start: usize, end: usize) -> Vec<String> {
    let mut pieces: Vec<String> = Vec::default();
    let mut group_marks: Vec<usize> = Vec::default();
    let mut pc = start;

    while pc < end {
        match &program.instructions[pc] {
            Instruction::MapOption { option } | Instruction::EarlyMap { option } => {
                let entry = &program.options[*option];
                // One rendering per declaration, not per mapped string.
                if entry.siblings.first() == Some(&entry.name) {
                    let names = entry
                        .siblings
                        .iter()
                        .map(|name| name.to_string())
                        .collect::<Vec<String>>()
                        .join("|");
                    if entry.oparg_usage.is_empty() {
                        pieces.push(format!("[{names}]"));
                    } else {
                        pieces.push(format!("[{names} {}]", entry.oparg_usage));
                    }
                }
                pc += 1;
            }
            Instruction::ConsumeArgument { usage, .. } => {
                pieces.push(usage.clone());
                pc += 1;
            }
            Instruction::GroupBegin { .. } => {
                group_marks.push(pieces.len());
                pc += 1;
            }
            Instruction::GroupEnd { .. } => {
                let mark = group_marks
                    .pop()
                    .unwrap_or_else(|| unreachable!("internal error - unbalanced usage group"));
                let inner = pieces.split_off(mark).join(" ");
                pieces.push(format!("[{inner}]"));
                pc += 1;
            }
            Instruction::BranchOnEmpty { .. } => {
                // The loop body sits between the branch and its back jump.
                let back = (pc + 1..end)
                    .find(|&address| {
                        matches!(
                            program.instructions[address],
                            Instruction::Jump { target } if target == pc
                        )
                    })
                    .unwrap_or_else(|| unreachable!("internal error - loop without a back jump"));
                let body = walk(program, pc + 1, back).join(" ");
                pieces.push(format!("[{body}]..."));
                pc = back + 1;
            }
            Instruction::Jump { .. } => {
                unreachable!("internal error - loop jump outside a branch body");
            }
            Instruction::EnterConverter { .. }
            | Instruction::CallConverter { .. }
            | Instruction::UnmapOption { .. }
            | Instruction::Return
            | Instruction::End => {
                pc += 1;
            }
        }
    }

    pieces
}

/// Render the full help message for one command program.
pub(crate) fn help_message(path: &str, program: &Program, about: Option<&str>) -> String {
    let width = terminal_width();
    let mut out = vec![usage_line(path, program)];

    if let Some(about) = about {
        out.push(String::default());
        out.extend(wrap(about, width.saturating_sub(1)));
    }

    let positionals = positional_rows(program);
    if !positionals.is_empty() {
        out.push(String::default());
        out.push("positional arguments:".to_string());
        out.extend(two_column(&positionals, width));
    }

    let options = option_rows(program);
    if !options.is_empty() {
        out.push(String::default());
        out.push("options:".to_string());
        out.extend(two_column(&options, width));
    }

    out.join("\n")
}

/// Render the help message for a branch node, listing its subcommands.
pub(crate) fn commands_help(path: &str, commands: &[(String, Option<String>)]) -> String {
    let width = terminal_width();
    let mut out = vec![format!("usage: {path} COMMAND ...")];

    if !commands.is_empty() {
        out.push(String::default());
        out.push("commands:".to_string());
        let rows: Vec<(String, String)> = commands
            .iter()
            .map(|(name, about)| (name.clone(), about.clone().unwrap_or_default()))
            .collect();
        out.extend(two_column(&rows, width));
    }

    out.join("\n")
}

fn positional_rows(program: &Program) -> Vec<(String, String)> {
    let mut rows = Vec::default();

    for instruction in &program.instructions[..program.main_length] {
        if let Instruction::ConsumeArgument { usage, .. } = instruction {
            rows.push((usage.clone(), String::default()));
        }
    }

    rows
}

fn option_rows(program: &Program) -> Vec<(String, String)> {
    let mut rows = Vec::default();

    for instruction in &program.instructions[..program.main_length] {
        let option = match instruction {
            Instruction::MapOption { option } | Instruction::EarlyMap { option } => *option,
            _ => continue,
        };
        let entry = &program.options[option];
        if entry.siblings.first() != Some(&entry.name) {
            continue;
        }

        let names = entry
            .siblings
            .iter()
            .map(|name| name.to_string())
            .collect::<Vec<String>>()
            .join(", ");
        let left = if entry.oparg_usage.is_empty() {
            names
        } else {
            format!("{names} {}", entry.oparg_usage)
        };
        let right = match entry.action {
            OptionAction::Help => "Show this help message and exit.".to_string(),
            OptionAction::Version => "Show the version and exit.".to_string(),
            _ => String::default(),
        };
        rows.push((left, right));
    }

    rows
}

fn two_column(rows: &[(String, String)], width: usize) -> Vec<String> {
    let padding = PADDING;
    let left_width = rows
        .iter()
        .map(|(left, _)| left.len())
        .max()
        .unwrap_or_default();
    let right_width = std::cmp::max(
        width.saturating_sub(left_width + padding + 1),
        MINIMUM_RIGHT_WIDTH,
    );
    let mut out = Vec::default();

    for (left, right) in rows {
        if right.is_empty() {
            out.push(format!(" {left}"));
            continue;
        }

        for (i, part) in wrap(right, right_width).into_iter().enumerate() {
            if i == 0 {
                out.push(format!(" {left:left_width$}{:padding$}{part}", ""));
            } else {
                out.push(format!(" {:left_width$}{:padding$}{part}", "", ""));
            }
        }
    }

    out
}

// Assuming an average word length of 5, this fits three words per line.
pub(crate) const MINIMUM_RIGHT_WIDTH: usize = 17;

// Greedy fill: words pack onto a line while they fit; a word wider than the
// whole line is sliced up front, each slice closed with a hyphen.
fn wrap(paragraph: &str, width: usize) -> Vec<String> {
    let width = std::cmp::max(width, 2);
    let mut lines: Vec<String> = Vec::default();
    let mut line = String::default();

    for word in paragraph.split_whitespace() {
        let mut piece = word;

        while piece.len() > width {
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            let (head, tail) = piece.split_at(width - 1);
            lines.push(format!("{head}-"));
            piece = tail;
        }

        if line.is_empty() {
            line.push_str(piece);
        } else if line.len() + 1 + piece.len() <= width {
            line.push(' ');
            line.push_str(piece);
        } else {
            lines.push(std::mem::take(&mut line));
            line.push_str(piece);
        }
    }

    if !line.is_empty() {
        lines.push(line);
    }

    lines
}
