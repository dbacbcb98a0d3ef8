fn main() {
    println!("dseg-rs - D-Segment Finder for elevated copy number");
    println!();
    println!("Tools:");
    println!("  dseg         - Scan read-start counts for D-segments (counts → report)");
    println!("  read_starts  - Build a read-start counts file from a BAM (BAM → counts)");
    println!();
    println!("For help with each tool:");
    println!("  cargo run --bin dseg -- --help");
    println!("  cargo run --bin read_starts -- --help");
    println!();
    println!("Quick start:");
    println!("  cargo run --bin read_starts -- --input-bam sample.bam --chrom chr20 --output chr20.counts.gz");
    println!("  cargo run --bin dseg -- --input chr20.counts.gz --output chr20.dsegments.xml --segments-tsv chr20.dsegments.tsv");
}
