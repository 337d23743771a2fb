//! Runs programs against the echo backend through the native adapter,
//! with the backend linked into the test binary instead of loaded from disk.

use pl2_core::{Diagnostic, Engine, EngineState, ErrorCode, Registry, parse_str};
use pl2_ext_echo::{UNSUPPORTED_VERSION, pl2ext_loadLanguage};

fn registry() -> Registry {
    let mut registry = Registry::new();
    unsafe { registry.register_native("pl2_ext_echo", pl2ext_loadLanguage) };
    registry
}

fn run(src: &str) -> (Result<(), Diagnostic>, Vec<Diagnostic>) {
    let mut program = parse_str(src).expect("program parses");
    let mut engine = Engine::new(&mut program, registry());
    let result = engine.run();
    (result, engine.take_warnings())
}

#[test]
fn descriptor_is_adapted() {
    // A command after `language` keeps the backend loaded after the first step.
    let mut program = parse_str("language pl2_ext_echo 1.0\necho x\n").unwrap();
    let mut engine = Engine::new(&mut program, registry());
    engine.step().unwrap();
    assert_eq!(engine.state(), EngineState::Running);
    let language = engine.language().expect("language loaded");
    assert_eq!(language.name, "Echo");
    assert_eq!(language.version.as_ref().map(ToString::to_string).as_deref(), Some("1.0.0"));
    let names: Vec<_> = language.sinvoke.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["echo", "print"]);
}

#[test]
fn echo_runs_and_print_is_deprecated() {
    let (result, warnings) = run("language pl2_ext_echo 1.0\necho \"Hello\\tWorld\"\nprint x\n");
    result.unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].code, ErrorCode::DEPRECATED_COMMAND);
    assert_eq!(warnings[0].line(), 3);
}

#[test]
fn skip_jumps_over_the_next_command() {
    // `bogus` would halt with UnknownCommand if it ran.
    let (result, _) = run("language pl2_ext_echo 1\nskip\nbogus\necho after\n");
    result.unwrap();
}

#[test]
fn skip_before_the_last_command_terminates() {
    let (result, _) = run("language pl2_ext_echo 1\nskip\nbogus\n");
    result.unwrap();
}

#[test]
fn exit_terminates() {
    let (result, _) = run("language pl2_ext_echo 1\nexit\nbogus\n");
    result.unwrap();
}

#[test]
fn unknown_commands_halt() {
    let (result, _) = run("language pl2_ext_echo 1\necho ok\nbogus\n");
    let err = result.unwrap_err();
    assert_eq!(err.code, ErrorCode::UNKNOWN_COMMAND);
    assert_eq!(err.line(), 3);
}

#[test]
fn backend_refuses_other_majors() {
    let (result, _) = run("language pl2_ext_echo 2.0\necho x\n");
    let err = result.unwrap_err();
    assert_eq!(err.code, ErrorCode(UNSUPPORTED_VERSION));
    assert!(err.message.contains("not 2"), "{}", err.message);
    assert_eq!(err.line(), 1);
}
