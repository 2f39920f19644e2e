//! Text console front end.
//!
//! Reads one command per line and dispatches it to a [`KernelOps`]. After
//! every command a randomly chosen question and the prompt are printed.

use std::fmt;
use std::fs;
use std::io::{BufRead, Write};
use std::str::FromStr;

use rand::seq::SliceRandom;
use tracing::{error, warn};

use crate::config::ConsoleConfig;
use crate::error::{KernelError, KernelResult};
use crate::kernel::{CommandOutcome, KernelOps};

const DEFAULT_HELP: &str = include_str!("../misc/galileo_help.txt");
const DEFAULT_QUESTIONS: &str = include_str!("../misc/galileo_questions.txt");

/// A console command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// `help`, `h`: print the command list.
    Help,
    /// `pause`, `p`
    Pause,
    /// `resume`, `r`
    Resume,
    /// `stop`
    Stop,
    /// `quit`: also sent at end of input.
    Quit,
    /// `plot`: reopen a hidden plot window.
    Plot,
    /// `autoscale on`, `+a`
    AutoscaleOn,
    /// `autoscale off`, `-a`
    AutoscaleOff,
    /// `clear plot`
    ClearPlot,
    /// Empty line: just prompt again.
    Prompt,
}

/// Text that is not a console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCommand(pub String);

impl fmt::Display for UnknownCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown command '{}'", self.0)
    }
}

impl std::error::Error for UnknownCommand {}

impl FromStr for ConsoleCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = s.trim().to_lowercase();
        Ok(match command.as_str() {
            "help" | "h" => ConsoleCommand::Help,
            "pause" | "p" => ConsoleCommand::Pause,
            "resume" | "r" => ConsoleCommand::Resume,
            "stop" => ConsoleCommand::Stop,
            "quit" => ConsoleCommand::Quit,
            "plot" => ConsoleCommand::Plot,
            "autoscale on" | "+a" => ConsoleCommand::AutoscaleOn,
            "autoscale off" | "-a" => ConsoleCommand::AutoscaleOff,
            "clear plot" => ConsoleCommand::ClearPlot,
            "" => ConsoleCommand::Prompt,
            _ => return Err(UnknownCommand(command)),
        })
    }
}

/// Help text, prompt questions and the prompt itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleResources {
    /// Printed at startup and on `help`.
    pub help: String,
    /// One is picked at random before each prompt.
    pub questions: Vec<String>,
    /// Prompt marker.
    pub prompt: String,
}

impl Default for ConsoleResources {
    fn default() -> Self {
        Self {
            help: DEFAULT_HELP.to_string(),
            questions: split_questions(DEFAULT_QUESTIONS),
            prompt: ConsoleConfig::default().prompt,
        }
    }
}

impl ConsoleResources {
    /// Built-in resources, with the files named in `config` taking precedence.
    pub fn load(config: &ConsoleConfig) -> KernelResult<Self> {
        let mut resources = Self {
            prompt: config.prompt.clone(),
            ..Self::default()
        };
        if let Some(path) = &config.help_file {
            resources.help = fs::read_to_string(path).map_err(|e| {
                KernelError::Configuration(format!("cannot read help file {}: {e}", path.display()))
            })?;
        }
        if let Some(path) = &config.questions_file {
            let text = fs::read_to_string(path).map_err(|e| {
                KernelError::Configuration(format!("cannot read questions file {}: {e}", path.display()))
            })?;
            resources.questions = split_questions(&text);
        }
        Ok(resources)
    }

    fn question(&self) -> &str {
        self.questions
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or_default()
    }
}

fn split_questions(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Line-oriented console bound to a kernel.
pub struct Console<'k, K: KernelOps + ?Sized> {
    kernel: &'k K,
    resources: ConsoleResources,
}

impl<'k, K: KernelOps + ?Sized> Console<'k, K> {
    /// Console driving `kernel`.
    pub fn new(kernel: &'k K, resources: ConsoleResources) -> Self {
        Self { kernel, resources }
    }

    /// Serve commands from `input` until the kernel has quit. End of input
    /// quits the kernel.
    pub fn run<R: BufRead, W: Write>(&self, input: R, mut output: W) -> KernelResult<()> {
        writeln!(output, "{}", self.resources.help)?;
        self.prompt(&mut output)?;

        let mut lines = input.lines();
        while !self.kernel.is_quit() {
            let Some(line) = lines.next() else {
                self.dispatch(ConsoleCommand::Quit, &mut output)?;
                break;
            };
            match line?.parse::<ConsoleCommand>() {
                Ok(command) => self.dispatch(command, &mut output)?,
                Err(unknown) => {
                    warn!(%unknown, "Unrecognised console input");
                    writeln!(output, "{unknown}, type 'help' for the list of commands")?;
                }
            }
            if !self.kernel.is_quit() {
                self.prompt(&mut output)?;
            }
        }
        output.flush()?;
        Ok(())
    }

    fn dispatch<W: Write>(&self, command: ConsoleCommand, output: &mut W) -> KernelResult<()> {
        let result = match command {
            ConsoleCommand::Help => {
                writeln!(output, "{}", self.resources.help)?;
                return Ok(());
            }
            ConsoleCommand::Prompt => return Ok(()),
            ConsoleCommand::Pause => self.kernel.pause(),
            ConsoleCommand::Resume => self.kernel.resume(),
            ConsoleCommand::Stop => self.kernel.stop(),
            ConsoleCommand::Plot => self.kernel.plot(),
            ConsoleCommand::AutoscaleOn => self.kernel.autoscale_on(),
            ConsoleCommand::AutoscaleOff => self.kernel.autoscale_off(),
            ConsoleCommand::ClearPlot => self.kernel.clear_plot(),
            ConsoleCommand::Quit => match self.kernel.quit() {
                Ok(report) => {
                    if report.forced_termination {
                        writeln!(output, "The plot window did not close in time and was terminated.")?;
                    }
                    Ok(report.outcome)
                }
                Err(e) => Err(e),
            },
        };

        match result {
            Ok(CommandOutcome::Done) => {}
            Ok(CommandOutcome::Ignored(misuse)) => writeln!(output, "Ignored: {misuse}.")?,
            Err(e) => {
                if e.is_recoverable() {
                    warn!(error = %e, ?command, "Console command failed");
                } else {
                    error!(error = %e, ?command, "Console command failed, plotting is unavailable");
                }
                writeln!(output, "Error: {e}")?;
            }
        }
        Ok(())
    }

    fn prompt<W: Write>(&self, output: &mut W) -> KernelResult<()> {
        writeln!(output, "{}", self.resources.question())?;
        write!(output, "{} ", self.resources.prompt)?;
        output.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{DummyKernel, KernelState, QuitReport};
    use std::io::{Cursor, Write as _};

    #[test]
    fn test_parse_commands() {
        assert_eq!("h".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Help));
        assert_eq!("  PAUSE ".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Pause));
        assert_eq!("+a".parse::<ConsoleCommand>(), Ok(ConsoleCommand::AutoscaleOn));
        assert_eq!("Autoscale Off".parse::<ConsoleCommand>(), Ok(ConsoleCommand::AutoscaleOff));
        assert_eq!("clear plot".parse::<ConsoleCommand>(), Ok(ConsoleCommand::ClearPlot));
        assert_eq!("".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Prompt));
        assert_eq!(
            "launch".parse::<ConsoleCommand>(),
            Err(UnknownCommand("launch".into()))
        );
    }

    #[test]
    fn test_default_resources() {
        let resources = ConsoleResources::default();
        assert!(resources.help.contains("autoscale on"));
        assert!(!resources.questions.is_empty());
        assert!(resources.questions.iter().any(|q| q.as_str() == resources.question()));
        assert_eq!(resources.prompt, "?>");
    }

    #[test]
    fn test_resources_from_files() {
        let mut questions = tempfile::NamedTempFile::new().unwrap();
        writeln!(questions, "Ready?\n\n  Again?  ").unwrap();
        let config = ConsoleConfig {
            prompt: "galileo>".into(),
            help_file: None,
            questions_file: Some(questions.path().to_path_buf()),
        };

        let resources = ConsoleResources::load(&config).unwrap();
        assert_eq!(resources.questions, vec!["Ready?".to_string(), "Again?".to_string()]);
        assert_eq!(resources.prompt, "galileo>");

        let missing = ConsoleConfig {
            help_file: Some("/nonexistent/help.txt".into()),
            ..ConsoleConfig::default()
        };
        assert!(matches!(ConsoleResources::load(&missing), Err(KernelError::Configuration(_))));
    }

    #[test]
    fn test_run_dispatches_until_quit() {
        let kernel = DummyKernel::new();
        kernel.start().unwrap();
        let console = Console::new(&kernel, ConsoleResources::default());

        let input = Cursor::new("p\nbogus\nr\nquit\nstop\n");
        let mut output = Vec::new();
        console.run(input, &mut output).unwrap();

        assert!(kernel.is_quit());
        assert_eq!(kernel.state(), KernelState::Stopped);
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("unknown command 'bogus'"));
        assert!(text.contains("?> "));
    }

    /// Dummy kernel whose consumer never closes in time.
    struct StuckPlotKernel(DummyKernel);

    impl KernelOps for StuckPlotKernel {
        fn title(&self) -> &str {
            self.0.title()
        }
        fn start(&self) -> KernelResult<CommandOutcome> {
            self.0.start()
        }
        fn pause(&self) -> KernelResult<CommandOutcome> {
            self.0.pause()
        }
        fn resume(&self) -> KernelResult<CommandOutcome> {
            self.0.resume()
        }
        fn stop(&self) -> KernelResult<CommandOutcome> {
            self.0.stop()
        }
        fn quit(&self) -> KernelResult<QuitReport> {
            let report = self.0.quit()?;
            Ok(QuitReport {
                forced_termination: true,
                ..report
            })
        }
        fn plot(&self) -> KernelResult<CommandOutcome> {
            self.0.plot()
        }
        fn autoscale_on(&self) -> KernelResult<CommandOutcome> {
            self.0.autoscale_on()
        }
        fn autoscale_off(&self) -> KernelResult<CommandOutcome> {
            self.0.autoscale_off()
        }
        fn clear_plot(&self) -> KernelResult<CommandOutcome> {
            self.0.clear_plot()
        }
        fn state(&self) -> KernelState {
            self.0.state()
        }
        fn is_quit(&self) -> bool {
            self.0.is_quit()
        }
    }

    struct BrokenTerminal;

    impl Write for BrokenTerminal {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_forced_quit_is_reported() {
        let kernel = StuckPlotKernel(DummyKernel::new());
        let console = Console::new(&kernel, ConsoleResources::default());
        let mut output = Vec::new();
        console.dispatch(ConsoleCommand::Quit, &mut output).unwrap();
        assert!(kernel.is_quit());
        assert!(String::from_utf8(output).unwrap().contains("was terminated"));

        let kernel = StuckPlotKernel(DummyKernel::new());
        let console = Console::new(&kernel, ConsoleResources::default());
        let result = console.dispatch(ConsoleCommand::Quit, &mut BrokenTerminal);
        assert!(matches!(result, Err(KernelError::Io(_))));
        assert!(kernel.is_quit());
    }

    #[test]
    fn test_end_of_input_quits() {
        let kernel = DummyKernel::new();
        let console = Console::new(&kernel, ConsoleResources::default());
        console.run(Cursor::new(""), Vec::new()).unwrap();
        assert!(kernel.is_quit());
    }
}
