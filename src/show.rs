use log::warn;

use flash_tree::{
    Node,
    check::{Image, Tester},
    walk,
};

fn print_node(depth: usize, node: Node<'_, '_>, verbose: bool) {
    let i = "  ".repeat(depth);
    match node {
        Node::Descriptor(d) => {
            println!("{i}{d}");
            if let (true, Some(r)) = (verbose, &d.region) {
                println!("{i}  flreg0 {}", r.flreg0);
            }
        }
        Node::Region(r) => {
            let b = r.base();
            println!("{i}{r} @ {b:08x}");
        }
        Node::Volume(v) => println!("{i}{v}"),
        Node::File(f) => println!("{i}{f}"),
        Node::Me(m) => {
            println!("{i}{m}");
            if let (true, Some(fpt)) = (verbose, &m.fpt) {
                println!("{i}  Pre-header: {:02x?}", fpt.pre_header);
            }
        }
        Node::Partition(p) => println!("{i}{p}"),
    }
}

pub fn show(tester: &Tester, image: &Image, verbose: bool) {
    println!("{}: {}", tester.name, tester.format);
    if verbose {
        println!("{image:#02x?}");
    }
    println!();
    match image {
        Image::Capsule(c) => {
            println!("{c}");
            println!("  body: 0x{:x} bytes", c.body().len());
        }
        Image::Manifest(m) => println!("{m}"),
        _ => match image.node() {
            Some(n) => walk(n, 0, &mut |d, n| print_node(d, n, verbose)),
            None => warn!("Nothing to show"),
        },
    }
    println!();
}
