//! Shell session facade tests.

mod session_test;

/// Verify the public shell types are exported from the library.
#[test]
fn test_all_shell_types_exported() {
    use dbshell_driver::shell::{
        ErrorKind, ExecutableResolver, NoPrompt, ResolveError, ShellArgs, ShellError,
        ShellOptions, ShellState,
    };

    let _ = ExecutableResolver::new();
    let _ = ShellArgs::new().build_args();
    let _ = ShellOptions::new("mongosh", "mongodb://localhost:27017");
    let _ = NoPrompt;
    let _ = ResolveError::UserCancelled;
    assert_eq!(ShellState::default(), ShellState::Created);
    assert_eq!(ShellError::Timeout(String::new()).kind(), ErrorKind::Timeout);
}
