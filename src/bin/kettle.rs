// Kettle CLI - Command Line Interface
// Usage: kettle [FILE] [OPTIONS]

use clap::Parser;
use colored::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

use kettle_core::ast::{Block, Expr, Program, Stmt};
use kettle_core::binary;
use kettle_core::compiler::{BytecodeProgram, Compiler};
use kettle_core::lexer::{Scanner, Token};
use kettle_core::parser;
use kettle_core::vm::{
    sorted_entries, NativeHost, Value, Vm, VmConfig, DEFAULT_MAX_FRAMES, DEFAULT_STACK_SIZE,
};
use kettle_core::{KettleError, Session};

/// Kettle - a small expression language on a bytecode VM
#[derive(Parser)]
#[command(name = "kettle")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A small expression language compiled to bytecode", long_about = None)]
struct Cli {
    /// Source file to run (.ktl or .ktlc)
    file: Option<PathBuf>,

    /// Debug options: tokens, ast, asm (comma-separated)
    #[arg(short = 'd', long = "debug", value_delimiter = ',')]
    debug: Option<Vec<String>>,

    /// Execute inline code
    #[arg(short = 'e', long = "exec")]
    exec: Option<String>,

    /// Compile to .ktlc instead of running
    #[arg(short = 'c', long = "compile")]
    compile: bool,

    /// Check for errors without running
    #[arg(long = "check")]
    check: bool,

    /// Output path for compiled file (requires -c)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Operand stack capacity
    #[arg(long = "stack-size", default_value_t = DEFAULT_STACK_SIZE)]
    stack_size: usize,

    /// Maximum call depth
    #[arg(long = "max-frames", default_value_t = DEFAULT_MAX_FRAMES)]
    max_frames: usize,
}

impl Cli {
    fn vm_config(&self) -> VmConfig {
        VmConfig {
            stack_size: self.stack_size,
            max_frames: self.max_frames,
            ..VmConfig::default()
        }
    }
}

/// Log to stderr; `RUST_LOG` overrides the default `warn` level
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_logging();

    let cli = Cli::parse();
    let debug = DebugFlags::from_options(&cli.debug);
    let config = cli.vm_config();

    let result = if let Some(code) = &cli.exec {
        handle_exec(code, &debug, config)
    } else if let Some(path) = &cli.file {
        if cli.check {
            handle_check(path)
        } else if cli.compile {
            handle_compile(path, &debug, cli.output.clone())
        } else {
            handle_run(path, &debug, config)
        }
    } else {
        repl(config)
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

#[derive(Default, Clone)]
struct DebugFlags {
    tokens: bool,
    ast: bool,
    asm: bool,
}

impl DebugFlags {
    fn from_options(opts: &Option<Vec<String>>) -> Self {
        let mut flags = Self::default();
        if let Some(opts) = opts {
            for opt in opts {
                match opt.as_str() {
                    "tokens" => flags.tokens = true,
                    "ast" => flags.ast = true,
                    "asm" => flags.asm = true,
                    _ => eprintln!("{} Unknown debug option: {}", "!".yellow(), opt),
                }
            }
        }
        flags
    }

    /// Token dump requested and nothing later in the pipeline
    fn stops_after_tokens(&self) -> bool {
        self.tokens && !self.ast && !self.asm
    }

    fn stops_after_ast(&self) -> bool {
        self.ast && !self.asm
    }
}

fn read_source(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("Error reading file '{}': {}", path.display(), e))
}

/// Scan, parse and compile. Token and AST dumps print in pipeline order;
/// without `asm` the build stops after the last requested dump.
fn build(source: &str, file_name: &str, debug: &DebugFlags) -> Result<Option<BytecodeProgram>, String> {
    let tokens = Scanner::new(source, file_name)
        .scan_tokens()
        .map_err(|e| e.to_string())?;

    if debug.tokens {
        print_tokens(&tokens);
        if debug.stops_after_tokens() {
            return Ok(None);
        }
    }

    let program = parser::Parser::new(tokens, file_name, source)
        .parse()
        .map_err(|e| e.to_string())?;

    if debug.ast {
        print_ast(&program)?;
        if debug.stops_after_ast() {
            return Ok(None);
        }
    }

    let mut compiler = Compiler::new(file_name, source);
    let bytecode = compiler.compile(&program).map_err(|e| e.to_string())?;
    Ok(Some(bytecode))
}

/// Check file for errors without running
fn handle_check(path: &Path) -> Result<(), String> {
    let source = read_source(path)?;
    let file_name = path.to_string_lossy().to_string();

    build(&source, &file_name, &DebugFlags::default())?;

    println!("{} No errors found in {}", "✓".green(), path.display());
    Ok(())
}

fn handle_compile(path: &Path, debug: &DebugFlags, output: Option<PathBuf>) -> Result<(), String> {
    let source = read_source(path)?;
    let file_name = path.to_string_lossy().to_string();

    let Some(bytecode) = build(&source, &file_name, debug)? else {
        return Ok(());
    };

    if debug.asm {
        println!("{}", bytecode.disassemble(&file_name));
        return Ok(());
    }

    let output_path = output.unwrap_or_else(|| path.with_extension("ktlc"));
    let bytes = binary::serialize(&bytecode);
    fs::write(&output_path, bytes).map_err(|e| format!("Error writing file: {}", e))?;
    println!("{} Compiled to {}", "✓".green(), output_path.display());

    Ok(())
}

fn handle_run(path: &Path, debug: &DebugFlags, config: VmConfig) -> Result<(), String> {
    let file_name = path.to_string_lossy().to_string();
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");

    let (bytecode, source) = match ext {
        "ktlc" => {
            let data = fs::read(path)
                .map_err(|e| format!("Error reading file '{}': {}", path.display(), e))?;
            let bytecode = binary::deserialize(&data)
                .map_err(|e| format!("{} {}: {}", "Error:".red().bold(), path.display(), e))?;
            (bytecode, String::new())
        }
        _ => {
            let source = read_source(path)?;
            let Some(bytecode) = build(&source, &file_name, debug)? else {
                return Ok(());
            };
            (bytecode, source)
        }
    };

    execute(bytecode, &file_name, &source, debug, config)
}

/// Execute inline code
fn handle_exec(code: &str, debug: &DebugFlags, config: VmConfig) -> Result<(), String> {
    let Some(bytecode) = build(code, "<exec>", debug)? else {
        return Ok(());
    };
    execute(bytecode, "<exec>", code, debug, config)
}

fn execute(
    bytecode: BytecodeProgram,
    file_name: &str,
    source: &str,
    debug: &DebugFlags,
    config: VmConfig,
) -> Result<(), String> {
    if debug.asm {
        println!("{}", bytecode.disassemble(file_name));
    }

    let value = Vm::with_host(bytecode, NativeHost, config)
        .with_source(file_name, source)
        .run()
        .map_err(|e| e.to_string())?;

    if let Some(text) = result_text(&value) {
        println!("{}", text);
    }
    Ok(())
}

fn print_tokens(tokens: &[Token]) {
    println!("{}", "-- Tokens --".cyan());
    for token in tokens {
        println!("  {:?} '{}'", token.kind, token.lexeme);
    }
    println!();
}

// ==================== REPL ====================

fn repl(config: VmConfig) -> Result<(), String> {
    use reedline::{
        FileBackedHistory, Prompt, PromptHistorySearch, PromptHistorySearchStatus, Reedline, Signal,
    };
    use std::borrow::Cow;
    use std::io::Write;

    /// Unbalanced delimiters or an open string mean more lines are coming
    fn is_incomplete(code: &str) -> bool {
        let mut depth = 0i32;
        let mut in_string = false;
        let mut escaped = false;

        for c in code.chars() {
            if in_string {
                match c {
                    _ if escaped => escaped = false,
                    '\\' => escaped = true,
                    '"' => in_string = false,
                    _ => {}
                }
                continue;
            }

            match c {
                '"' => in_string = true,
                '{' | '(' | '[' => depth += 1,
                '}' | ')' | ']' => depth -= 1,
                _ => {}
            }
        }

        depth > 0 || in_string
    }

    struct KettlePrompt {
        left: &'static str,
    }

    impl Prompt for KettlePrompt {
        fn render_prompt_left(&self) -> Cow<'_, str> {
            Cow::Borrowed(self.left)
        }
        fn render_prompt_right(&self) -> Cow<'_, str> {
            Cow::Borrowed("")
        }
        fn render_prompt_indicator(&self, _: reedline::PromptEditMode) -> Cow<'_, str> {
            Cow::Borrowed("")
        }
        fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
            Cow::Borrowed("... ")
        }
        fn render_prompt_history_search_indicator(&self, history_search: PromptHistorySearch) -> Cow<'_, str> {
            let prefix = match history_search.status {
                PromptHistorySearchStatus::Passing => "",
                PromptHistorySearchStatus::Failing => "failing ",
            };
            Cow::Owned(format!("({}reverse-search: {}) ", prefix, history_search.term))
        }
    }

    println!();
    println!(
        "  {}  {}",
        "Kettle".cyan().bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_black()
    );
    println!("  {}", "Type .help for commands, .exit to quit".bright_black());
    println!();

    let history_path = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kettle_history");
    let history = Box::new(FileBackedHistory::with_file(1000, history_path).map_err(|e| e.to_string())?);

    let mut line_editor = Reedline::create().with_history(history);
    let main_prompt = KettlePrompt { left: ">>> " };
    let continue_prompt = KettlePrompt { left: "... " };

    let mut session = Session::new("<repl>", config);
    let mut accumulated_input = String::new();

    loop {
        let prompt = if accumulated_input.is_empty() {
            &main_prompt
        } else {
            &continue_prompt
        };

        match line_editor.read_line(prompt) {
            Ok(Signal::Success(line)) => {
                // An empty line ends multiline input
                if line.trim().is_empty() && !accumulated_input.is_empty() {
                    let input = std::mem::take(&mut accumulated_input);
                    print_repl_result(session.eval(input.trim()));
                    continue;
                }

                let input = line.trim();
                if input.is_empty() {
                    continue;
                }

                if accumulated_input.is_empty() && input.starts_with('.') {
                    match input {
                        ".exit" | ".quit" => break,
                        ".help" => print_repl_help(),
                        ".clear" => {
                            print!("\x1B[2J\x1B[1;1H");
                            let _ = std::io::stdout().flush();
                        }
                        ".reset" => {
                            session.reset();
                            println!("{}", "  Session state reset".bright_black());
                        }
                        _ => {
                            println!("{} Unknown command: {}", "!".red(), input);
                            println!("  Type {} for available commands", ".help".cyan());
                        }
                    }
                    continue;
                }

                if !accumulated_input.is_empty() {
                    accumulated_input.push('\n');
                }
                accumulated_input.push_str(&line);

                if is_incomplete(&accumulated_input) {
                    continue;
                }

                let input = std::mem::take(&mut accumulated_input);
                print_repl_result(session.eval(input.trim()));
            }
            Ok(Signal::CtrlC) => {
                if !accumulated_input.is_empty() {
                    accumulated_input.clear();
                    println!("{}", "^C (input cleared)".bright_black());
                } else {
                    println!("{}", "^C".bright_black());
                }
            }
            Ok(Signal::CtrlD) => {
                println!("{}", "^D".bright_black());
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    println!("\n{}", "Goodbye!".bright_black());
    Ok(())
}

fn print_repl_help() {
    println!();
    println!("  {}", "REPL Commands:".cyan().bold());
    println!("    {}    Exit the REPL", ".exit".yellow());
    println!("    {}   Clear the screen", ".clear".yellow());
    println!("    {}   Forget all bindings", ".reset".yellow());
    println!("    {}    Show this help", ".help".yellow());
    println!();
    println!("  {}", "Builtins:".cyan().bold());
    println!("    len  puts  first  last  rest  push");
    println!();
}

/// Text printed for a program or REPL result; null prints nothing
fn result_text(value: &Value) -> Option<String> {
    if value.is_null() {
        None
    } else {
        Some(format_value(value, 0))
    }
}

fn print_repl_result(result: Result<Value, KettleError>) {
    match result {
        Ok(value) => {
            if let Some(text) = result_text(&value) {
                println!("{}", text);
            }
        }
        Err(e) => eprintln!("{}", e),
    }
}

/// Format a value with syntax highlighting
fn format_value(value: &Value, depth: usize) -> String {
    match value {
        Value::Null => "null".bright_black().to_string(),
        Value::Boolean(b) => b.to_string().yellow().to_string(),
        Value::Integer(_) | Value::Float(_) => value.to_string().yellow().to_string(),
        Value::String(s) => format!("{:?}", s).green().to_string(),
        Value::Array(items) => {
            if items.is_empty() {
                "[]".to_string()
            } else if items.len() <= 8 && depth < 2 {
                let items: Vec<String> = items.iter().map(|v| format_value(v, depth + 1)).collect();
                format!("[{}]", items.join(", "))
            } else {
                format!("[Array({})]", items.len()).bright_black().to_string()
            }
        }
        Value::Hash(pairs) => {
            if pairs.is_empty() {
                "{}".to_string()
            } else if pairs.len() <= 4 && depth < 2 {
                let items: Vec<String> = sorted_entries(pairs)
                    .into_iter()
                    .map(|(k, v)| format!("{}: {}", k.to_string().cyan(), format_value(v, depth + 1)))
                    .collect();
                format!("{{{}}}", items.join(", "))
            } else {
                format!("{{Hash({} keys)}}", pairs.len()).bright_black().to_string()
            }
        }
        Value::Builtin(_) | Value::CompiledFunction(_) | Value::Closure(_) => {
            value.to_string().cyan().to_string()
        }
    }
}

// ==================== AST Dump ====================

fn print_ast(program: &Program) -> Result<(), String> {
    let mut tree = ptree::TreeBuilder::new("Program".to_string());
    for stmt in &program.statements {
        build_stmt_tree(&mut tree, stmt);
    }
    let tree = tree.build();
    ptree::print_tree(&tree).map_err(|e| e.to_string())
}

fn build_block_tree(tree: &mut ptree::TreeBuilder, label: &str, block: &Block) {
    tree.begin_child(label.to_string());
    for stmt in &block.statements {
        build_stmt_tree(tree, stmt);
    }
    tree.end_child();
}

fn build_stmt_tree(tree: &mut ptree::TreeBuilder, stmt: &Stmt) {
    match stmt {
        Stmt::Let {
            name,
            mutability,
            value,
            ..
        } => {
            tree.begin_child(format!("{} '{}'", mutability, name));
            build_expr_tree(tree, value);
            tree.end_child();
        }
        Stmt::Assign { name, value, .. } => {
            tree.begin_child(format!("Assign '{}'", name));
            build_expr_tree(tree, value);
            tree.end_child();
        }
        Stmt::Return { value, .. } => {
            tree.begin_child("Return".to_string());
            if let Some(value) = value {
                build_expr_tree(tree, value);
            }
            tree.end_child();
        }
        Stmt::Expression { expr, .. } => {
            tree.begin_child("Expr".to_string());
            build_expr_tree(tree, expr);
            tree.end_child();
        }
    }
}

fn build_expr_tree(tree: &mut ptree::TreeBuilder, expr: &Expr) {
    match expr {
        Expr::Identifier { name, .. } => {
            tree.add_empty_child(format!("Identifier '{}'", name));
        }
        Expr::Integer { value, .. } => {
            tree.add_empty_child(format!("Integer {}", value));
        }
        Expr::Float { value, .. } => {
            tree.add_empty_child(format!("Float {:?}", value));
        }
        Expr::String { value, .. } => {
            tree.add_empty_child(format!("String {:?}", value));
        }
        Expr::Boolean { value, .. } => {
            tree.add_empty_child(format!("Boolean {}", value));
        }
        Expr::Null { .. } => {
            tree.add_empty_child("Null".to_string());
        }
        Expr::Unary { op, operand, .. } => {
            tree.begin_child(format!("Unary '{}'", op.symbol()));
            build_expr_tree(tree, operand);
            tree.end_child();
        }
        Expr::Binary { left, op, right, .. } => {
            tree.begin_child(format!("Binary '{}'", op.symbol()));
            build_expr_tree(tree, left);
            build_expr_tree(tree, right);
            tree.end_child();
        }
        Expr::If {
            condition,
            then_branch,
            else_branch,
            ..
        } => {
            tree.begin_child("If".to_string());
            tree.begin_child("condition".to_string());
            build_expr_tree(tree, condition);
            tree.end_child();
            build_block_tree(tree, "then", then_branch);
            if let Some(else_branch) = else_branch {
                build_block_tree(tree, "else", else_branch);
            }
            tree.end_child();
        }
        Expr::Function(func) => {
            let params: Vec<&str> = func.params.iter().map(|p| p.name.as_str()).collect();
            let name = func.name.as_deref().unwrap_or("<anonymous>");
            tree.begin_child(format!("Function {}({})", name, params.join(", ")));
            build_block_tree(tree, "body", &func.body);
            tree.end_child();
        }
        Expr::Call { callee, args, .. } => {
            tree.begin_child("Call".to_string());
            build_expr_tree(tree, callee);
            if !args.is_empty() {
                tree.begin_child("args".to_string());
                for arg in args {
                    build_expr_tree(tree, arg);
                }
                tree.end_child();
            }
            tree.end_child();
        }
        Expr::Array { elements, .. } => {
            tree.begin_child(format!("Array ({})", elements.len()));
            for element in elements {
                build_expr_tree(tree, element);
            }
            tree.end_child();
        }
        Expr::Hash { pairs, .. } => {
            tree.begin_child(format!("Hash ({})", pairs.len()));
            for (key, value) in pairs {
                tree.begin_child("entry".to_string());
                build_expr_tree(tree, key);
                build_expr_tree(tree, value);
                tree.end_child();
            }
            tree.end_child();
        }
        Expr::Index { object, index, .. } => {
            tree.begin_child("Index".to_string());
            build_expr_tree(tree, object);
            build_expr_tree(tree, index);
            tree.end_child();
        }
    }
}
