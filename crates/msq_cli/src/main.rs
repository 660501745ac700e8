use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use log::info;
use msq_core::framing::{self, BlockKind, BlockSpan, FramedFile, MARKER_SIZE};
use msq_core::{map, MapBlockTree, TreeNode};
use serde_json::{json, Value as JsonValue};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List every block of a game file.
    Info {
        #[arg(value_name = "GAME_FILE")]
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Decode one map block into its editable JSON tree form.
    Unpack {
        #[arg(value_name = "GAME_FILE")]
        path: PathBuf,
        /// Block index as listed by `info`.
        #[arg(long)]
        block: usize,
        /// Write the tree here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Re-encode a JSON tree into a copy of the game file.
    Pack {
        #[arg(value_name = "TREE.JSON")]
        tree: PathBuf,
        #[arg(long, value_name = "GAME_FILE")]
        file: PathBuf,
        /// Block index to replace.
        #[arg(long)]
        block: usize,
        #[arg(long)]
        output: PathBuf,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Info { path, json } => run_info(&path, json),
        Command::Unpack {
            path,
            block,
            output,
        } => run_unpack(&path, block, output.as_deref()),
        Command::Pack {
            tree,
            file,
            block,
            output,
        } => run_pack(&tree, &file, block, &output),
    }
}

fn read_file(path: &Path) -> Vec<u8> {
    fs::read(path).unwrap_or_else(|e| {
        eprintln!("Error reading {}: {e}", path.display());
        process::exit(1);
    })
}

fn scan_file(bytes: &[u8], path: &Path) -> FramedFile {
    framing::scan(bytes).unwrap_or_else(|e| {
        eprintln!("Error framing {}: {}", path.display(), e);
        process::exit(1);
    })
}

fn block_span(framed: &FramedFile, index: usize, path: &Path) -> BlockSpan {
    *framed.spans.get(index).unwrap_or_else(|| {
        eprintln!(
            "{} holds {} block(s), no block {index}",
            path.display(),
            framed.spans.len()
        );
        process::exit(1);
    })
}

fn kind_name(kind: BlockKind) -> &'static str {
    match kind {
        BlockKind::Map => "map",
        BlockKind::Savegame => "savegame",
        BlockKind::ShopList => "shopList",
    }
}

fn run_info(path: &Path, json: bool) {
    let bytes = read_file(path);
    let framed = scan_file(&bytes, path);

    if json {
        let blocks: Vec<JsonValue> = framed
            .spans
            .iter()
            .enumerate()
            .map(|(i, span)| {
                let mut entry = json!({
                    "index": i,
                    "offset": span.offset,
                    "size": span.size,
                    "kind": kind_name(span.kind),
                });
                if span.kind == BlockKind::Map
                    && let Ok(tree) = map::decode(span.body(&bytes))
                {
                    entry["mapSize"] = JsonValue::from(tree.map_size());
                    entry["parts"] = JsonValue::from(tree.parts().len());
                }
                entry
            })
            .collect();
        let doc = json!({
            "file": path.display().to_string(),
            "diskId": framed.disk_id,
            "blocks": blocks,
        });
        println!("{}", serde_json::to_string_pretty(&doc).expect("JSON encoding failed"));
        return;
    }

    println!("{}: disk id {}", path.display(), framed.disk_id);
    for (i, span) in framed.spans.iter().enumerate() {
        let detail = if span.kind == BlockKind::Map {
            match map::decode(span.body(&bytes)) {
                Ok(tree) => format!(
                    ", {}x{}, {} part(s)",
                    tree.map_size(),
                    tree.map_size(),
                    tree.parts().len()
                ),
                Err(e) => format!(", undecodable: {e}"),
            }
        } else {
            String::new()
        };
        println!(
            "  block {i}: {} at {:#x}, {} bytes{detail}",
            kind_name(span.kind),
            span.offset,
            span.size
        );
    }
}

fn run_unpack(path: &Path, block: usize, output: Option<&Path>) {
    let bytes = read_file(path);
    let framed = scan_file(&bytes, path);
    let span = block_span(&framed, block, path);
    if span.kind != BlockKind::Map {
        eprintln!("block {block} is a {} block, not a map", kind_name(span.kind));
        process::exit(1);
    }

    let tree = map::decode(span.body(&bytes)).unwrap_or_else(|e| {
        eprintln!("Error decoding block {block}: {e}");
        process::exit(1);
    });
    info!(
        "unpacked block {block}: {}x{} map, {} part(s)",
        tree.map_size(),
        tree.map_size(),
        tree.parts().len()
    );

    let text = serde_json::to_string_pretty(&tree.to_tree()).expect("JSON encoding failed");
    match output {
        Some(target) => fs::write(target, text).unwrap_or_else(|e| {
            eprintln!("Error writing {}: {e}", target.display());
            process::exit(1);
        }),
        None => println!("{text}"),
    }
}

fn run_pack(tree_path: &Path, file: &Path, block: usize, output: &Path) {
    let tree_text = read_file(tree_path);
    let node: TreeNode = serde_json::from_slice(&tree_text).unwrap_or_else(|e| {
        eprintln!("Error parsing {}: {e}", tree_path.display());
        process::exit(1);
    });
    let tree = MapBlockTree::from_tree(&node).unwrap_or_else(|e| {
        eprintln!("Error rebuilding tree from {}: {e}", tree_path.display());
        process::exit(1);
    });
    let body = map::encode(&tree).unwrap_or_else(|e| {
        eprintln!("Error encoding block: {e}");
        process::exit(1);
    });

    let bytes = read_file(file);
    let framed = scan_file(&bytes, file);
    let span = block_span(&framed, block, file);
    if span.kind != BlockKind::Map {
        eprintln!("block {block} is a {} block, not a map", kind_name(span.kind));
        process::exit(1);
    }

    // Splice the re-encoded body in behind the original marker; a body
    // of a different length simply shifts the following blocks.
    let mut out = Vec::with_capacity(bytes.len());
    out.extend_from_slice(&bytes[..span.offset + MARKER_SIZE]);
    out.extend_from_slice(&body);
    out.extend_from_slice(&bytes[span.offset + span.size..]);
    info!(
        "packed block {block}: {} byte body into {}",
        body.len(),
        output.display()
    );

    fs::write(output, out).unwrap_or_else(|e| {
        eprintln!("Error writing {}: {e}", output.display());
        process::exit(1);
    });
}
