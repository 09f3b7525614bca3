/// Quotes `arg` for safe embedding in a POSIX `sh` command line: wraps in single quotes,
/// escaping any embedded single quote as `'\''`. Mirrors the quoting the reference
/// implementation's `prepare_execution`/`run_command` apply before building an `sh -c` string.
fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', "'\\''"))
}

fn shell_join(args: &[String]) -> String {
    args.iter().map(|arg| shell_quote(arg)).collect::<Vec<_>>().join(" ")
}

/// Builds the execution container's entrypoint script (spec.md §4.5 step 6, collapsed with step
/// 8 per the documented Open Question resolution): run the user command, redirecting
/// stdout/stderr to the declared file paths if any, then echo the agent-result JSON the
/// exit-harvest loop consumes. Only the numeric return code and a fixed debug string are
/// interpolated into the echoed JSON — argv text never reaches the shell's JSON literal, so no
/// escaping of arbitrary user content is needed.
pub(crate) fn build_execution_script(
    command: &[String],
    stdout_file: Option<&str>,
    stderr_file: Option<&str>,
) -> String {
    let mut invocation = shell_join(command);
    if let Some(path) = stdout_file {
        invocation.push_str(&format!(" >{}", shell_quote(path)));
    }
    if let Some(path) = stderr_file {
        invocation.push_str(&format!(" 2>{}", shell_quote(path)));
    }

    format!(
        "{invocation}; rc=$?; if [ $rc -eq 0 ]; then \
         echo '{{\"state\":\"succeeded\",\"returnCode\":'$rc',\"executed\":true}}'; \
         else echo '{{\"state\":\"failed\",\"debugInfo\":\"command exited with return code '$rc'\",\"executed\":true,\"returnCode\":'$rc'}}'; fi"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_arguments_with_embedded_single_quotes() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn script_redirects_to_declared_files() {
        let script = build_execution_script(&["echo".to_string(), "hi".to_string()], Some("out.txt"), None);
        assert!(script.starts_with("'echo' 'hi' >'out.txt'"));
        assert!(script.contains("\"state\":\"succeeded\""));
    }

    #[test]
    fn script_reports_failed_on_nonzero_exit() {
        let script = build_execution_script(&["false".to_string()], None, None);
        assert!(script.contains("\"state\":\"failed\""));
        assert!(script.contains("debugInfo"));
    }
}
