//! `time` pipelines: wall clock plus user and system CPU of the shell and
//! its waited-for children.

use std::io::{self, Write};
use std::mem::MaybeUninit;
use std::time::{Duration, Instant};

use crate::ast::{Command, CommandFlags};
use crate::fds::CloseSet;
use crate::process::Pipes;
use crate::shell::Shell;
use crate::types::ExecuteResult;

const DEFAULT_FORMAT: &str = "\nreal\t%3lR\nuser\t%3lU\nsys\t%3lS";
const POSIX_FORMAT: &str = "real %2R\nuser %2U\nsys %2S";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Times {
    pub real: Duration,
    pub user: Duration,
    pub sys: Duration,
}

fn timeval(tv: libc::timeval) -> Duration {
    Duration::from_secs(tv.tv_sec.max(0) as u64) + Duration::from_micros(tv.tv_usec.max(0) as u64)
}

fn rusage(who: libc::c_int) -> (Duration, Duration) {
    let mut usage = MaybeUninit::<libc::rusage>::zeroed();
    // SAFETY: `usage` is a valid buffer that getrusage fills in.
    if unsafe { libc::getrusage(who, usage.as_mut_ptr()) } != 0 {
        return (Duration::ZERO, Duration::ZERO);
    }
    // SAFETY: zero-initialised and filled by a successful getrusage call.
    let usage = unsafe { usage.assume_init() };
    (timeval(usage.ru_utime), timeval(usage.ru_stime))
}

fn cpu_now() -> (Duration, Duration) {
    let (self_user, self_sys) = rusage(libc::RUSAGE_SELF);
    let (child_user, child_sys) = rusage(libc::RUSAGE_CHILDREN);
    (self_user + child_user, self_sys + child_sys)
}

pub struct Stopwatch {
    started: Instant,
    user: Duration,
    sys: Duration,
}

impl Stopwatch {
    pub fn start() -> Self {
        let (user, sys) = cpu_now();
        Self {
            started: Instant::now(),
            user,
            sys,
        }
    }

    pub fn elapsed(&self) -> Times {
        let (user, sys) = cpu_now();
        Times {
            real: self.started.elapsed(),
            user: user.saturating_sub(self.user),
            sys: sys.saturating_sub(self.sys),
        }
    }
}

fn seconds(value: Duration, precision: usize, long: bool) -> String {
    let secs = value.as_secs_f64();
    if long {
        let minutes = (secs / 60.0).floor();
        format!("{}m{:.*}s", minutes as u64, precision, secs - minutes * 60.0)
    } else {
        format!("{:.*}", precision, secs)
    }
}

/// Expand a `TIMEFORMAT` string: `%[p][l]R`, `%[p][l]U`, `%[p][l]S`, `%P`
/// and `%%`. Unknown sequences are copied through.
pub fn format_times(format: &str, times: &Times) -> String {
    let mut out = String::new();
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut precision = 3;
        let mut long = false;
        if let Some(digit) = chars.peek().and_then(|d| d.to_digit(10)) {
            precision = digit.min(3) as usize;
            chars.next();
        }
        if chars.peek() == Some(&'l') {
            long = true;
            chars.next();
        }
        match chars.next() {
            Some('R') => out.push_str(&seconds(times.real, precision, long)),
            Some('U') => out.push_str(&seconds(times.user, precision, long)),
            Some('S') => out.push_str(&seconds(times.sys, precision, long)),
            Some('P') => {
                let real = times.real.as_secs_f64();
                let cpu = (times.user + times.sys).as_secs_f64();
                let percent = if real > 0.0 { cpu * 100.0 / real } else { 0.0 };
                out.push_str(&format!("{:.2}", percent));
            }
            Some('%') => out.push('%'),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

impl Shell {
    /// Run `cmd` and report how long it took on stderr.
    pub(crate) fn execute_timed(
        &mut self,
        cmd: &Command,
        flags: CommandFlags,
        asynchronous: bool,
        pipes: Pipes,
        close_set: &CloseSet,
    ) -> ExecuteResult {
        let untimed = flags - (CommandFlags::TIME_EXECUTION | CommandFlags::TIME_POSIX);
        let stopwatch = Stopwatch::start();
        let result = self.execute_with_flags(cmd, untimed, asynchronous, pipes, close_set);
        let times = stopwatch.elapsed();

        let format = if flags.contains(CommandFlags::TIME_POSIX) {
            Some(POSIX_FORMAT.to_string())
        } else {
            match self.vars.get("TIMEFORMAT") {
                Some("") => None,
                Some(custom) => Some(custom.to_string()),
                None => Some(DEFAULT_FORMAT.to_string()),
            }
        };
        if let Some(format) = format {
            let mut stderr = io::stderr().lock();
            let _ = writeln!(stderr, "{}", format_times(&format, &times));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Times {
        Times {
            real: Duration::from_millis(61_400),
            user: Duration::from_millis(250),
            sys: Duration::from_millis(120),
        }
    }

    #[test]
    fn default_format_uses_minutes() {
        assert_eq!(
            format_times(DEFAULT_FORMAT, &sample()),
            "\nreal\t1m1.400s\nuser\t0m0.250s\nsys\t0m0.120s"
        );
    }

    #[test]
    fn posix_and_custom_formats() {
        assert_eq!(format_times(POSIX_FORMAT, &sample()), "real 61.40\nuser 0.25\nsys 0.12");
        assert_eq!(format_times("%0R %% %x", &sample()), "61 % %x");
        assert_eq!(format_times("%P", &Times::default()), "0.00");
    }

    #[test]
    fn stopwatch_never_goes_backwards() {
        let watch = Stopwatch::start();
        let times = watch.elapsed();
        assert!(times.real >= Duration::ZERO);
    }
}
