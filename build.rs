// Build script to compile GLSL shaders to SPIR-V

use std::process::Command;
use std::path::Path;

fn main() {
    println!("cargo:rerun-if-changed=resources/shaders/");

    // Compile shaders using glslc (part of Vulkan SDK)
    compile_shader("resources/shaders/shader.vert", "resources/shaders/spir-v/vert.spv");
    compile_shader("resources/shaders/shader.frag", "resources/shaders/spir-v/frag.spv");
    compile_shader("resources/shaders/overlay.vert", "resources/shaders/spir-v/overlay_vert.spv");
    compile_shader("resources/shaders/overlay.frag", "resources/shaders/spir-v/overlay_frag.spv");
}

fn compile_shader(input: &str, output: &str) {
    let input_path = Path::new(input);
    let output_path = Path::new(output);

    if let Some(dir) = output_path.parent() {
        let _ = std::fs::create_dir_all(dir);
    }

    // Check if glslc is available
    let result = Command::new("glslc")
        .arg(input_path)
        .arg("-o")
        .arg(output_path)
        .status();

    match result {
        Ok(status) if status.success() => {
            println!("Compiled {} -> {}", input, output);
        }
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), shaders were not compiled", e);
            println!("cargo:warning=compile manually: glslc {} -o {}", input, output);
        }
    }
}
