use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crowdpulse_core::{
    age_to_range, compute_group_panic, compute_panic_score, default_model_dir, gender_risk_weight,
    vulnerability_from_age, AnalysisOptions, FaceScoreRecord, Gender, ImageAnalysis, ModelCache, ModelPaths,
};
use std::io::Read;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "crowdpulse", about = "Crowd panic scoring from face captures")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyse capture images locally
    Analyze {
        /// Image files to analyse
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Directory holding the ONNX model files
        #[arg(long, env = "CROWDPULSE_MODEL_DIR")]
        model_dir: Option<PathBuf>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
        /// Include base64 JPEG face crops (JSON output only)
        #[arg(long)]
        crops: bool,
    },
    /// Score a single face from its attributes
    Score {
        /// Estimated age in years
        #[arg(long)]
        age: Option<i32>,
        /// male or female
        #[arg(long, default_value = "female")]
        gender: Gender,
        /// Fear-weighted emotion score in [0, 1]
        #[arg(long, value_parser = parse_unit_interval)]
        fear: f64,
        /// Face detection confidence in [0, 1]
        #[arg(long, default_value_t = 1.0, value_parser = parse_unit_interval)]
        confidence: f64,
    },
    /// Group panic score from a JSON array of face records
    Group {
        /// JSON file, or "-" for stdin
        #[arg(default_value = "-")]
        file: String,
    },
    /// Show the display bucket and vulnerability for an age
    AgeRange { age: i32 },
    /// Ask the daemon to analyse a capture
    Submit {
        image: PathBuf,
        #[arg(long)]
        system: bool,
    },
    /// Show recent analyses stored by the daemon
    History {
        /// Number of rows (0 uses the daemon default)
        #[arg(short, long, default_value_t = 0)]
        limit: u32,
        #[arg(long)]
        system: bool,
    },
    /// Show the stored analysis for a capture
    Show {
        image: PathBuf,
        #[arg(long)]
        system: bool,
    },
    /// Show daemon status
    Status {
        #[arg(long)]
        system: bool,
    },
}

/// Scoring inputs are probabilities; reject anything outside [0, 1].
fn parse_unit_interval(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is outside [0, 1]"))
    }
}

#[zbus::proxy(
    interface = "org.crowdpulse.Analyzer1",
    default_service = "org.crowdpulse.Analyzer1",
    default_path = "/org/crowdpulse/Analyzer1"
)]
trait Analyzer {
    async fn analyze_capture(&self, path: &str) -> zbus::Result<String>;
    async fn history(&self, limit: u32) -> zbus::Result<String>;
    async fn lookup(&self, path: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze { images, model_dir, json, crops } => {
            let dir = model_dir.unwrap_or_else(default_model_dir);
            run_analyze(&images, &ModelPaths::in_dir(&dir), json, crops)?;
        }
        Commands::Score { age, gender, fear, confidence } => {
            let vuln = vulnerability_from_age(age);
            let (raw, panic) = compute_panic_score(vuln, fear, gender_risk_weight(gender), confidence);
            println!("age vulnerability: {vuln:.2}");
            println!("raw score:         {raw:.4}");
            println!("panic score:       {panic:.1}");
        }
        Commands::Group { file } => {
            let text = read_input(&file)?;
            let faces: Vec<FaceScoreRecord> =
                serde_json::from_str(&text).context("expected a JSON array of face records")?;
            println!("faces:       {}", faces.len());
            println!("group panic: {:.1}", compute_group_panic(&faces));
        }
        Commands::AgeRange { age } => {
            println!("range:         {}", age_to_range(age));
            println!("vulnerability: {:.2}", vulnerability_from_age(Some(age)));
        }
        Commands::Submit { image, system } => {
            let path = std::fs::canonicalize(&image)
                .with_context(|| format!("capture not found: {}", image.display()))?;
            let proxy = connect(system).await?;
            let reply = proxy.analyze_capture(&path.to_string_lossy()).await?;
            print_json(&reply)?;
        }
        Commands::History { limit, system } => {
            let proxy = connect(system).await?;
            print_json(&proxy.history(limit).await?)?;
        }
        Commands::Show { image, system } => {
            let path = std::fs::canonicalize(&image).unwrap_or(image);
            let proxy = connect(system).await?;
            print_json(&proxy.lookup(&path.to_string_lossy()).await?)?;
        }
        Commands::Status { system } => {
            let proxy = match connect(system).await {
                Ok(p) => p,
                Err(e) => {
                    println!("crowdpulsed: not connected ({e})");
                    return Ok(());
                }
            };
            print_json(&proxy.status().await?)?;
        }
    }

    Ok(())
}

fn run_analyze(images: &[PathBuf], paths: &ModelPaths, json: bool, crops: bool) -> Result<()> {
    let options = AnalysisOptions { include_crops: crops && json };
    let mut models = ModelCache::new();
    tracing::debug!(detector = %paths.detector.display(), "loading models");
    let ctx = models
        .initialize(paths)
        .with_context(|| format!("loading models from {}", paths.detector.parent().unwrap_or(paths.detector.as_path()).display()))?;

    for image in images {
        let analysis = ctx
            .analyze_path(image, &options)
            .with_context(|| format!("analysing {}", image.display()))?;
        tracing::debug!(
            image = %image.display(),
            faces = analysis.group_stats.total_faces,
            panic_score = analysis.group_stats.panic_score,
            "capture analysed"
        );
        if json {
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        } else {
            print_summary(&image.display().to_string(), &analysis);
        }
    }
    Ok(())
}

fn print_summary(name: &str, analysis: &ImageAnalysis) {
    let stats = &analysis.group_stats;
    println!("{name}");
    println!(
        "  faces: {} (male {}, female {})  panic score: {:.1}",
        stats.total_faces, stats.male_count, stats.female_count, stats.panic_score
    );
    for face in &analysis.faces {
        println!(
            "  #{:<2} {:<6} {:<7} {:<9} fear {:.2}  conf {:.2}  panic {:.1}",
            face.id, face.gender, face.age_range, face.emotion_label, face.fear_score, face.confidence, face.panic_score
        );
    }
}

fn read_input(file: &str) -> Result<String> {
    if file == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read_to_string(file).with_context(|| format!("reading {file}"))
    }
}

async fn connect(system: bool) -> Result<AnalyzerProxy<'static>> {
    tracing::debug!(bus = if system { "system" } else { "session" }, "connecting to crowdpulsed");
    let conn = if system {
        zbus::Connection::system().await?
    } else {
        zbus::Connection::session().await?
    };
    Ok(AnalyzerProxy::new(&conn).await?)
}

fn print_json(reply: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(reply).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_analyze() {
        let cli = Cli::try_parse_from(["crowdpulse", "analyze", "a.jpg", "b.jpg", "--json"]).unwrap();
        match cli.command {
            Commands::Analyze { images, json, crops, .. } => {
                assert_eq!(images, vec![PathBuf::from("a.jpg"), PathBuf::from("b.jpg")]);
                assert!(json);
                assert!(!crops);
            }
            _ => panic!("expected analyze"),
        }
    }

    #[test]
    fn test_analyze_requires_image() {
        assert!(Cli::try_parse_from(["crowdpulse", "analyze"]).is_err());
    }

    #[test]
    fn test_parse_score() {
        let cli = Cli::try_parse_from([
            "crowdpulse", "score", "--age", "8", "--gender", "M", "--fear", "0.7",
        ])
        .unwrap();
        match cli.command {
            Commands::Score { age, gender, fear, confidence } => {
                assert_eq!(age, Some(8));
                assert_eq!(gender, Gender::Male);
                assert_eq!(fear, 0.7);
                assert_eq!(confidence, 1.0);
            }
            _ => panic!("expected score"),
        }
    }

    #[test]
    fn test_score_inputs_must_be_probabilities() {
        let rejected: Vec<Vec<&str>> = vec![
            vec!["crowdpulse", "score", "--fear", "1.5"],
            vec!["crowdpulse", "score", "--fear=-0.1"],
            vec!["crowdpulse", "score", "--fear", "0.5", "--confidence", "2"],
            vec!["crowdpulse", "score", "--fear", "lots"],
        ];
        for args in rejected {
            assert!(Cli::try_parse_from(args.iter().copied()).is_err(), "accepted {args:?}");
        }
        assert!(Cli::try_parse_from(["crowdpulse", "score", "--fear", "1", "--confidence", "0"]).is_ok());
        assert_eq!(parse_unit_interval("0.25"), Ok(0.25));
    }

    #[test]
    fn test_analyze_fails_without_models() {
        let paths = ModelPaths::in_dir(std::path::Path::new("/nonexistent/crowdpulse-models"));
        let err = run_analyze(&[PathBuf::from("capture.jpg")], &paths, false, false).unwrap_err();
        assert!(err.to_string().contains("loading models"));
    }

    #[test]
    fn test_bad_gender_rejected() {
        assert!(Cli::try_parse_from(["crowdpulse", "score", "--gender", "x", "--fear", "0.1"]).is_err());
    }

    #[test]
    fn test_history_defaults() {
        let cli = Cli::try_parse_from(["crowdpulse", "history"]).unwrap();
        assert!(matches!(cli.command, Commands::History { limit: 0, system: false }));
    }

    #[test]
    fn test_group_defaults_to_stdin() {
        let cli = Cli::try_parse_from(["crowdpulse", "group"]).unwrap();
        assert!(matches!(cli.command, Commands::Group { file } if file == "-"));
    }
}
