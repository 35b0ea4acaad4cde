// Build script to compile GLSL shaders to SPIR-V
//
// Output lands in assets/shaders/, which is where Storage looks by default.

use std::path::Path;
use std::process::Command;

const SHADERS: &[&str] = &["Base.vert", "Base.frag"];

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    let out_dir = Path::new("assets/shaders");
    if let Err(e) = std::fs::create_dir_all(out_dir) {
        println!("cargo:warning=Couldn't create {}: {}", out_dir.display(), e);
        return;
    }

    // Compile shaders using glslc (part of Vulkan SDK)
    for name in SHADERS {
        let input = Path::new("shaders").join(name);
        let output = out_dir.join(format!("{}.spv", name));
        compile_shader(&input, &output);
    }
}

fn compile_shader(input: &Path, output: &Path) {
    let result = Command::new("glslc").arg(input).arg("-o").arg(output).status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input.display(), status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), {} was not compiled", e, input.display());
            println!(
                "cargo:warning=Install the Vulkan SDK or run: glslc {} -o {}",
                input.display(),
                output.display()
            );
        }
    }
}
