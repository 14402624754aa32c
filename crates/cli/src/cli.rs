use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ProfileArg {
    Basic,
    Enhanced,
    FoodLabel,
}

impl ProfileArg {
    pub fn name(self) -> &'static str {
        match self {
            ProfileArg::Basic => "basic",
            ProfileArg::Enhanced => "enhanced",
            ProfileArg::FoodLabel => "food_label",
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "glutenscan",
    version,
    about = "Read ingredient labels and check them for gluten"
)]
pub struct CliArgs {
    /// Override the configuration file path
    #[arg(long = "config", global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON instead of a summary
    #[arg(long = "json", global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// OCR a label photo, then analyze the ingredients
    Scan {
        /// Image file (PNG, JPEG, WEBP, ...) or an http(s) address
        image: PathBuf,

        /// Scan profile; defaults to the configured one
        #[arg(short = 'p', long = "profile", value_enum)]
        profile: Option<ProfileArg>,

        /// Send the image to a remote OCR server instead of a local engine
        #[arg(long = "remote", value_name = "URL")]
        remote: Option<String>,
    },
    /// Analyze an ingredient list given as text
    Analyze {
        text: String,
    },
    /// Clean up raw OCR text without analyzing it
    Normalize {
        text: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scan_with_options() {
        let args = CliArgs::try_parse_from([
            "glutenscan",
            "scan",
            "label.jpg",
            "--profile",
            "food-label",
            "--remote",
            "http://localhost:5000",
            "--json",
        ])
        .unwrap();
        assert!(args.json);
        match args.command {
            Command::Scan { image, profile, remote } => {
                assert_eq!(image, PathBuf::from("label.jpg"));
                assert_eq!(profile, Some(ProfileArg::FoodLabel));
                assert_eq!(remote.as_deref(), Some("http://localhost:5000"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn analyze_takes_text() {
        let args = CliArgs::try_parse_from(["glutenscan", "analyze", "rice, salt"]).unwrap();
        assert!(matches!(args.command, Command::Analyze { text } if text == "rice, salt"));
        assert!(!args.json);
    }

    #[test]
    fn unknown_profile_is_rejected() {
        assert!(CliArgs::try_parse_from(["glutenscan", "scan", "a.png", "-p", "turbo"]).is_err());
    }

    #[test]
    fn profile_names_match_pipeline_profiles() {
        for p in [ProfileArg::Basic, ProfileArg::Enhanced, ProfileArg::FoodLabel] {
            assert!(glutenscan_ocr::ScanProfile::by_name(p.name()).is_some());
        }
    }
}
