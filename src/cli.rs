use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "folio")]
#[command(version)]
#[command(about = "Read comic archives (.cbz, .cb7, .cbr) page by page", long_about = None)]
#[command(after_help = "Examples:\n  \
  folio pages \"Saga/Saga 001.cbz\"              list the pages of an issue\n  \
  folio page \"Saga/Saga 001.cbz\" 12 -o p12.png  open page 12 and save it\n  \
  folio recent list                           archives read most recently")]
pub struct Cli {
    /// Configuration file, merged over the platform configuration
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Library root, overriding `library.root`
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// More log output (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List comic archives in the library
    List {
        /// Only list archives under this directory
        #[arg(value_name = "DIR")]
        prefix: Option<PathBuf>,
    },

    /// List the pages of an archive in reading order
    Pages {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,
    },

    /// Open a page, remember it as the last page read, and save it as PNG
    Page {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        /// Page number, starting at 1
        #[arg(value_name = "NUMBER", value_parser = clap::value_parser!(u32).range(1..))]
        number: u32,

        /// Where to write the PNG
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Write the broken-page placeholder instead of failing on a bad page
        #[arg(long)]
        placeholder: bool,
    },

    /// Save the cover of an archive as a PNG thumbnail
    Thumbnail {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Recently read archives
    Recent {
        #[command(subcommand)]
        action: RecentCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum RecentCommand {
    /// Most recently read first
    List {
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
    /// Forget every archive's reading progress
    Clear,
    /// Forget the reading progress of one archive
    Forget {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[test]
    fn test_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_page_command() {
        let cli = Cli::try_parse_from(["folio", "-vv", "page", "a.cbz", "3", "-o", "out.png", "--placeholder"]).unwrap();
        assert_eq!(cli.verbose, 2);
        let Command::Page { archive, number, output, placeholder } = cli.command else {
            panic!("expected page command");
        };
        assert_eq!(archive, PathBuf::from("a.cbz"));
        assert_eq!(number, 3);
        assert_eq!(output, PathBuf::from("out.png"));
        assert!(placeholder);
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::try_parse_from(["folio", "recent", "list", "--root", "/srv/comics", "--config", "f.toml"]).unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/srv/comics")));
        assert_eq!(cli.config, Some(PathBuf::from("f.toml")));
        assert!(matches!(cli.command, Command::Recent { action: RecentCommand::List { limit: 20 } }));
    }

    #[rstest]
    #[case(&["folio", "page", "a.cbz", "0", "-o", "x.png"])]
    #[case(&["folio", "page", "a.cbz", "1"])]
    #[case(&["folio", "thumbnail", "a.cbz"])]
    #[case(&["folio", "recent"])]
    fn test_rejected(#[case] args: &[&str]) {
        assert!(Cli::try_parse_from(args).is_err());
    }
}
