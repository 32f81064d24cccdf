pub use anyhow::{Result as R, anyhow};
use clap::{ArgAction, Parser};
use iffcodex_lib::*;
use std::io::Write;

/// Inspect and re-encode EA IFF 85 chunk files
#[derive(Parser, Debug)]
#[command(name = "iffcodex")]
#[command(version)]
#[command(about = "Decode IFF/AIFF chunk files and print their structure", long_about = None)]
struct Cli {
    /// File to decode
    #[arg(value_name = "FILE")]
    file: String,

    /// Print the decoded tree as JSON
    #[arg(long)]
    json: bool,

    /// Stream the decoded tree back out to this path
    #[arg(long, value_name = "OUT")]
    echo: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn print_node(
    out: &mut impl Write,
    tree: &Tree,
    node: NodeId,
    codec: &dyn Codec,
    depth: usize,
) -> R<()> {
    let indent = "  ".repeat(depth);
    match tree.node(node)? {
        Node::Group(group) => {
            writeln!(
                out,
                "{}{} {} ({} bytes)",
                indent,
                group.id(),
                group.subtype(),
                tree.size(node)?
            )?;
            for &child in group.children() {
                print_node(out, tree, child, codec, depth + 1)?;
            }
        }
        _ => {
            let chunk = tree.chunk(node)?;
            match codec.describe(tree, node) {
                Some(description) => writeln!(
                    out,
                    "{}{} ({} bytes) {}",
                    indent,
                    chunk.id(),
                    chunk.size(),
                    description
                )?,
                None => writeln!(out, "{}{} ({} bytes)", indent, chunk.id(), chunk.size())?,
            }
        }
    }
    Ok(())
}

fn main() -> R<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let start_time = std::time::Instant::now();
    let c = Codex::open(&cli.file)?;
    let root = c.root()?;
    let group = c.tree.group(root)?;
    eprintln!("{} {}", group.id(), group.subtype());

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if cli.json {
        serde_json::to_writer_pretty(&mut out, &c.describe_json()?)?;
        writeln!(out)?;
    } else {
        print_node(&mut out, &c.tree, root, c.codec(), 0)?;
    }

    if let Some(output_file) = &cli.echo {
        let mut file = std::fs::File::create(output_file)
            .map_err(|e| anyhow!("Failed to create {}: {}", output_file, e))?;
        let written = std::io::copy(&mut c.tree.reader(root), &mut file)?;
        eprintln!("Wrote {} bytes to {}", written, output_file);
    }

    let elapsed_time = start_time.elapsed();
    eprintln!(
        "Finished {} in {} seconds",
        c.get_filename(),
        elapsed_time.as_secs_f32()
    );

    Ok(())
}
