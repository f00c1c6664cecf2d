use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;

/// Restyle a room photograph.
///
/// Positional only. Help and version flags are disabled because stdout is
/// reserved for the single result record.
#[derive(Parser, Debug)]
#[command(
    name = "room-styler",
    disable_help_flag = true,
    disable_version_flag = true
)]
struct Cli {
    /// Photograph of the room to restyle.
    #[arg(value_name = "SOURCE_IMAGE", allow_hyphen_values = true)]
    source: Option<PathBuf>,
    /// Interior design style, interpolated into the prompt verbatim.
    #[arg(value_name = "STYLE", allow_hyphen_values = true)]
    style: Option<String>,
    /// Where to write the restyled image. The parent directory must exist.
    #[arg(value_name = "DESTINATION_IMAGE", allow_hyphen_values = true)]
    destination: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub source: PathBuf,
    pub style: String,
    pub destination: PathBuf,
}

/// Parses the process arguments, program name included.
pub fn parse_request<I, T>(args: I) -> anyhow::Result<Request>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::try_parse_from(args).map_err(|e| anyhow::anyhow!(summarize(&e)))?;

    let (Some(source), Some(style), Some(destination)) = (cli.source, cli.style, cli.destination)
    else {
        anyhow::bail!("Missing arguments");
    };
    if style.is_empty() {
        anyhow::bail!("Style label must not be empty");
    }
    // reported back verbatim in `output_path`
    if destination.to_str().is_none() {
        anyhow::bail!(
            "Destination path must be valid UTF-8: {}",
            destination.display()
        );
    }

    Ok(Request {
        source,
        style,
        destination,
    })
}

// clap renders multi-line errors with usage; keep the first line only.
fn summarize(error: &clap::Error) -> String {
    let rendered = error.to_string();
    let first = rendered.lines().next().unwrap_or_default();
    first.strip_prefix("error: ").unwrap_or(first).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_positionals() {
        let request = parse_request(["room-styler", "in.png", "Modern", "out.png"]).unwrap();

        assert_eq!(
            request,
            Request {
                source: PathBuf::from("in.png"),
                style: "Modern".to_string(),
                destination: PathBuf::from("out.png"),
            }
        );
    }

    #[test]
    fn fewer_than_three_is_missing_arguments() {
        for args in [
            vec!["room-styler"],
            vec!["room-styler", "in.png"],
            vec!["room-styler", "in.png", "Modern"],
        ] {
            let error = parse_request(args).unwrap_err();
            assert_eq!(error.to_string(), "Missing arguments");
        }
    }

    #[test]
    fn extra_arguments_are_rejected() {
        let error = parse_request(["room-styler", "in.png", "Modern", "out.png", "extra"])
            .unwrap_err()
            .to_string();

        assert!(error.contains("extra"), "{error}");
        assert!(!error.contains('\n'));
    }

    #[test]
    fn style_is_taken_verbatim() {
        let request =
            parse_request(["room-styler", "in.png", "-Mid-century \"modern\"", "out.png"]).unwrap();
        assert_eq!(request.style, "-Mid-century \"modern\"");
    }

    #[test]
    fn empty_style_is_rejected() {
        let error = parse_request(["room-styler", "in.png", "", "out.png"]).unwrap_err();
        assert_eq!(error.to_string(), "Style label must not be empty");
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_destination_is_rejected() {
        use std::os::unix::ffi::OsStringExt;

        let args = vec![
            OsString::from("room-styler"),
            OsString::from("in.png"),
            OsString::from("Modern"),
            OsString::from_vec(b"out-\xff.png".to_vec()),
        ];
        let error = parse_request(args).unwrap_err().to_string();

        assert!(error.starts_with("Destination path must be valid UTF-8"), "{error}");
    }
}
