//! Tests for the dispatch engine, driven through in-process backends.
//!
//! Covers: the `language` and `abort` directives, table lookup order,
//! redirection and memoization, warnings, error propagation, and teardown.

mod common;

use common::{Log, parse};
use pl2_core::{
    BackendContext, CommandId, Diagnostic, Engine, EngineState, ErrorCode, Language, LoaderConfig,
    NativeLoader, Next, PCallEntry, Registry, SInvokeEntry, SemVer, Severity, StepOutcome,
    run_source,
};

/// A backend with a logging simple-invoke `tick`, a program-call `loop`
/// that jumps back until its context counter reaches 3, and a
/// program-call `stop` that terminates.
fn test_language(log: &Log) -> Language {
    let tick_log = log.clone();
    let exit_log = log.clone();
    Language::new("Test")
        .with_version(SemVer::new(1, 2, 0))
        .with_init(|| Ok(Box::new(0u32) as BackendContext))
        .with_at_exit(move |ctx| {
            let loops = ctx.downcast_ref::<u32>().copied().unwrap_or_default();
            exit_log.push(format!("exit:{loops}"));
        })
        .sinvoke(SInvokeEntry::new("tick", move |argv| {
            tick_log.push(argv.join(" "));
        }))
        .pcall(PCallEntry::new("loop", |program, ctx, id| {
            let count = ctx.downcast_mut::<u32>().unwrap();
            if *count < 3 {
                *count += 1;
                Ok(program.prev(id).map_or(Next::Advance, Next::Jump))
            } else {
                Ok(Next::Advance)
            }
        }))
        .pcall(PCallEntry::new("stop", |_, _, _| Ok(Next::Terminate)))
}

fn registry(log: &Log) -> Registry {
    let log = log.clone();
    Registry::new().with("t", move |_| Ok(test_language(&log)))
}

fn run(src: &str, loader: Registry) -> (Result<(), Diagnostic>, Vec<Diagnostic>) {
    let mut program = parse(src);
    let mut engine = Engine::new(&mut program, loader);
    let result = engine.run();
    assert_eq!(engine.state(), EngineState::Halted);
    (result, engine.take_warnings())
}

// ─── Directives ──────────────────────────────────────────────────────────────

#[test]
fn simple_invoke_receives_name_and_arguments() {
    let log = Log::new();
    let (result, warnings) = run("language t 1.0\ntick a \"b c\"\n", registry(&log));
    result.unwrap();
    assert!(warnings.is_empty());
    assert_eq!(log.events(), ["tick a b c", "exit:0"]);
}

#[test]
fn second_language_directive_is_rejected() {
    let log = Log::new();
    let (result, _) = run("language t 1.0\nlanguage t 1.0\ntick\n", registry(&log));
    let err = result.unwrap_err();
    assert_eq!(err.code, ErrorCode::LOAD_LANGUAGE_FAILED);
    assert_eq!(err.line(), 2);
    assert!(err.message.contains("already loaded"), "{}", err.message);
    assert_eq!(log.events(), ["exit:0"]);
}

#[test]
fn language_needs_two_arguments() {
    let (result, _) = run("language t\n", Registry::new());
    let err = result.unwrap_err();
    assert_eq!(err.code, ErrorCode::LOAD_LANGUAGE_FAILED);
    assert!(err.message.contains("expected 2 arguments, got 1"), "{}", err.message);
}

#[test]
fn malformed_version_is_a_semver_error() {
    let (result, _) = run("language t 1.x\n", Registry::new());
    assert_eq!(result.unwrap_err().code, ErrorCode::SEMVER_PARSE);
}

#[test]
fn nul_in_prerelease_tag_is_a_semver_error() {
    let log = Log::new();
    let (result, _) = run("language t \"1.2-a\\0b\"\ntick\n", registry(&log));
    let err = result.unwrap_err();
    assert_eq!(err.code, ErrorCode::SEMVER_PARSE);
    assert!(err.message.contains("NUL"), "{}", err.message);
    assert!(log.events().is_empty());
}

#[test]
fn incompatible_version_is_rejected() {
    let log = Log::new();
    let (result, _) = run("language t 2.0\ntick\n", registry(&log));
    let err = result.unwrap_err();
    assert_eq!(err.code, ErrorCode::LOAD_LANGUAGE_FAILED);
    assert!(log.events().is_empty());
}

#[test]
fn missing_native_library_leaves_engine_idle() {
    let cwd = tempfile::tempdir().unwrap();
    let home = tempfile::tempdir().unwrap();
    let loader = NativeLoader::new(
        LoaderConfig::default()
            .with_current_dir(cwd.path())
            .with_home(home.path()),
    );
    let mut program = parse("language foo 1.0\ntick\n");
    let mut engine = Engine::new(&mut program, loader);
    let err = engine.step().unwrap_err();
    assert_eq!(err.code, ErrorCode::LOAD_LANGUAGE_FAILED);
    assert_eq!(err.line(), 1);
    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(engine.cursor(), Some(CommandId::new(0)));
    assert!(engine.language().is_none());
}

#[test]
fn abort_halts_and_runs_at_exit() {
    let log = Log::new();
    let (result, _) = run("language t 1\nabort\ntick\n", registry(&log));
    result.unwrap();
    assert_eq!(log.events(), ["exit:0"]);
}

#[test]
fn abort_without_language() {
    let (result, warnings) = run("abort\nx\n", Registry::new());
    result.unwrap();
    assert!(warnings.is_empty());
}

// ─── Lookup ──────────────────────────────────────────────────────────────────

#[test]
fn commands_before_language_warn_and_continue() {
    let log = Log::new();
    let (result, warnings) = run("tick\nlanguage t 1\ntick\n", registry(&log));
    result.unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].code, ErrorCode::NO_LANGUAGE_LOADED);
    assert_eq!(warnings[0].severity, Severity::Warn);
    assert_eq!(warnings[0].line(), 1);
    assert_eq!(log.events(), ["tick", "exit:0"]);
}

#[test]
fn unknown_command_halts_with_its_line() {
    let log = Log::new();
    let (result, _) = run("language t 1\ntick\n\nfrobnicate 1\ntick\n", registry(&log));
    let err = result.unwrap_err();
    assert_eq!(err.code, ErrorCode::UNKNOWN_COMMAND);
    assert_eq!(err.line(), 4);
    assert!(err.message.contains("frobnicate"), "{}", err.message);
    assert_eq!(log.events(), ["tick", "exit:0"]);
}

#[test]
fn simple_invoke_wins_over_program_call() {
    let log = Log::new();
    let pcall_log = log.clone();
    let sinvoke_log = log.clone();
    let loader = Registry::new().with("t", move |_| {
        let pcall_log = pcall_log.clone();
        let sinvoke_log = sinvoke_log.clone();
        Ok(Language::new("t")
            .pcall(PCallEntry::new("x", move |_, _, _| {
                pcall_log.push("pcall");
                Ok(Next::Advance)
            }))
            .sinvoke(SInvokeEntry::new("x", move |_| sinvoke_log.push("sinvoke"))))
    });
    let (result, _) = run("language t 1\nx\n", loader);
    result.unwrap();
    assert_eq!(log.events(), ["sinvoke"]);
}

#[test]
fn router_can_decline_a_command() {
    let log = Log::new();
    let fallback_log = log.clone();
    let loader = Registry::new().with("t", move |_| {
        let fallback_log = fallback_log.clone();
        Ok(Language::new("t")
            .pcall(PCallEntry::new("x", |_, _, _| Ok(Next::Advance)).with_router(|_| false))
            .with_fallback(move |program, _, id| {
                let name = program.get(id).map(|c| c.name().text.clone()).unwrap_or_default();
                fallback_log.push(format!("fallback:{name}"));
                Ok(Next::Advance)
            }))
    });
    let (result, _) = run("language t 1\nx\ny\n", loader);
    result.unwrap();
    assert_eq!(log.events(), ["fallback:x", "fallback:y"]);
}

#[test]
fn fallback_can_terminate() {
    let loader = Registry::new().with("t", |_| {
        Ok(Language::new("t").with_fallback(|_, _, _| Ok(Next::Terminate)))
    });
    let mut program = parse("language t 1\nanything\nelse\n");
    let mut engine = Engine::new(&mut program, loader);
    assert_eq!(engine.step().unwrap(), StepOutcome::Continue);
    assert_eq!(engine.state(), EngineState::Running);
    assert_eq!(engine.step().unwrap(), StepOutcome::Halted);
    assert_eq!(engine.state(), EngineState::Halted);
    assert_eq!(engine.step().unwrap(), StepOutcome::Halted);
}

// ─── Redirection ─────────────────────────────────────────────────────────────

#[test]
fn backward_jumps_form_loops() {
    let log = Log::new();
    let (result, _) = run("language t 1\ntick\nloop\ntick done\n", registry(&log));
    result.unwrap();
    assert_eq!(log.events(), ["tick", "tick", "tick", "tick", "tick done", "exit:3"]);
}

#[test]
fn resolved_commands_ignore_later_table_changes() {
    let log = Log::new();
    let mut program = parse("language t 1\ntick\nloop\n");
    let mut engine = Engine::new(&mut program, registry(&log));
    engine.step().unwrap();
    engine.step().unwrap();
    engine.step().unwrap();
    assert_eq!(engine.cursor(), Some(CommandId::new(1)));

    engine.language_mut().unwrap().pcall.clear();
    engine.run().unwrap();
    assert_eq!(log.count("tick"), 4);
}

#[test]
fn terminate_skips_the_rest() {
    let log = Log::new();
    let (result, _) = run("language t 1\ntick\nstop\ntick\n", registry(&log));
    result.unwrap();
    assert_eq!(log.events(), ["tick", "exit:0"]);
}

#[test]
fn redirect_outside_the_program_is_an_error() {
    let loader = Registry::new().with("t", |_| {
        Ok(Language::new("t").pcall(PCallEntry::new("jump", |_, _, _| {
            Ok(Next::Jump(CommandId::new(99)))
        })))
    });
    let (result, _) = run("language t 1\njump\n", loader);
    let err = result.unwrap_err();
    assert_eq!(err.code, ErrorCode::INVALID_REDIRECT);
    assert_eq!(err.line(), 2);
}

// ─── Warnings ────────────────────────────────────────────────────────────────

#[test]
fn deprecated_and_empty_entries_warn() {
    let log = Log::new();
    let tick_log = log.clone();
    let loader = Registry::new().with("t", move |_| {
        let tick_log = tick_log.clone();
        Ok(Language::new("t")
            .sinvoke(SInvokeEntry::new("old", move |_| tick_log.push("old")).deprecated())
            .pcall(PCallEntry::empty("todo")))
    });
    let (result, warnings) = run("language t 1\nold\ntodo\nold\n", loader);
    result.unwrap();
    let codes: Vec<_> = warnings.iter().map(|w| w.code).collect();
    assert_eq!(
        codes,
        [
            ErrorCode::DEPRECATED_COMMAND,
            ErrorCode::EMPTY_ENTRY,
            ErrorCode::DEPRECATED_COMMAND
        ]
    );
    assert_eq!(warnings[1].line(), 3);
    assert_eq!(log.count("old"), 2);
}

#[test]
fn looping_over_a_deprecated_command_warns_once() {
    let log = Log::new();
    let tick_log = log.clone();
    let loader = Registry::new().with("t", move |_| {
        let tick_log = tick_log.clone();
        Ok(Language::new("t")
            .with_init(|| Ok(Box::new(0u32) as BackendContext))
            .sinvoke(SInvokeEntry::new("old", move |_| tick_log.push("old")).deprecated())
            .pcall(PCallEntry::new("again", |program, ctx, id| {
                let count = ctx.downcast_mut::<u32>().unwrap();
                *count += 1;
                if *count < 10_000 {
                    Ok(program.prev(id).map_or(Next::Advance, Next::Jump))
                } else {
                    Ok(Next::Advance)
                }
            })))
    });
    let mut program = parse("language t 1\nold\nagain\n");
    let mut engine = Engine::new(&mut program, loader);
    engine.run().unwrap();
    assert_eq!(log.count("old"), 10_000);
    assert_eq!(engine.warnings().len(), 1);
    assert_eq!(engine.warnings()[0].code, ErrorCode::DEPRECATED_COMMAND);
    assert_eq!(engine.warnings()[0].line(), 2);
}

#[test]
fn removed_entries_are_invisible() {
    let loader = Registry::new().with("t", |_| {
        Ok(Language::new("t").sinvoke(SInvokeEntry::new("gone", |_| {}).removed()))
    });
    let (result, _) = run("language t 1\ngone\n", loader);
    assert_eq!(result.unwrap_err().code, ErrorCode::UNKNOWN_COMMAND);
}

// ─── Errors and teardown ─────────────────────────────────────────────────────

#[test]
fn stub_errors_halt_with_location() {
    let log = Log::new();
    let exit_log = log.clone();
    let loader = Registry::new().with("t", move |_| {
        let exit_log = exit_log.clone();
        Ok(Language::new("t")
            .with_at_exit(move |_| exit_log.push("exit"))
            .pcall(PCallEntry::new("div", |_, _, _| {
                Err(Diagnostic::error(ErrorCode(104), "division by zero"))
            })))
    });
    let (result, _) = run("language t 1\n\ndiv 1 0\n", loader);
    let err = result.unwrap_err();
    assert_eq!(err.code, ErrorCode(104));
    assert!(err.code.is_user());
    assert_eq!(err.line(), 3);
    assert!(err.span.is_some());
    assert_eq!(log.events(), ["exit"]);
}

#[test]
fn init_failure_keeps_backend_code() {
    let loader = Registry::new().with("t", |_| {
        Ok(Language::new("t")
            .with_init(|| Err(Diagnostic::error(ErrorCode(101), "no device attached"))))
    });
    let mut program = parse("language t 1\nx\n");
    let mut engine = Engine::new(&mut program, loader);
    let err = engine.run().unwrap_err();
    assert_eq!(err.code, ErrorCode(101));
    assert_eq!(err.line(), 1);
    assert!(engine.language().is_none());
}

#[test]
fn at_exit_sees_the_init_context() {
    let log = Log::new();
    let (result, _) = run("language t 1\ntick\nloop\n", registry(&log));
    result.unwrap();
    assert_eq!(log.events().last().map(String::as_str), Some("exit:3"));
}

#[test]
fn dropping_an_engine_tears_down() {
    let log = Log::new();
    let mut program = parse("language t 1\ntick\ntick\n");
    {
        let mut engine = Engine::new(&mut program, registry(&log));
        engine.step().unwrap();
        engine.step().unwrap();
    }
    assert_eq!(log.events(), ["tick", "exit:0"]);
}

#[test]
fn extension_slots_are_cleared_at_teardown() {
    let loader = Registry::new().with("t", |_| {
        Ok(Language::new("t").pcall(PCallEntry::new("mark", |program, _, id| {
            if let Some(cmd) = program.get_mut(id) {
                cmd.set_extension(Box::new(7i64));
            }
            Ok(Next::Advance)
        })))
    });
    let mut program = parse("language t 1\nmark\n");
    let mut engine = Engine::new(&mut program, loader);
    engine.step().unwrap();
    engine.step().unwrap();
    let id = CommandId::new(1);
    assert_eq!(engine.program().get(id).unwrap().extension_as::<i64>(), None);
    drop(engine);
    assert!(program.get(id).unwrap().extension().is_none());
}

#[test]
fn run_source_collects_warnings() {
    let warnings = run_source("a\nb\n", Registry::new()).unwrap();
    assert_eq!(warnings.len(), 2);
    assert!(warnings.iter().all(|w| w.code == ErrorCode::NO_LANGUAGE_LOADED));

    let err = run_source("\"open", Registry::new()).unwrap_err();
    assert_eq!(err.code, ErrorCode::UNCLOSED_STRING);
}
