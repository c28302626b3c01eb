//! Helper for running and checking external commands, used by the
//! capability probe. Grounded on `pbs-tools/src/command.rs`.

use anyhow::{bail, format_err, Error};

pub fn command_output(output: std::process::Output) -> Result<String, Error> {
    if !output.status.success() {
        match output.status.code() {
            Some(code) => {
                let msg = String::from_utf8(output.stderr)
                    .map(|m| if m.is_empty() { String::from("no error message") } else { m })
                    .unwrap_or_else(|_| String::from("non utf8 error message (suppressed)"));
                bail!("status code: {} - {}", code, msg);
            }
            None => bail!("terminated by signal"),
        }
    }
    String::from_utf8(output.stdout).map_err(Error::from)
}

pub fn run_command(mut command: std::process::Command) -> Result<String, Error> {
    let output = command
        .output()
        .map_err(|err| format_err!("failed to execute {:?} - {}", command, err))?;
    command_output(output).map_err(|err| format_err!("command {:?} failed - {}", command, err))
}
