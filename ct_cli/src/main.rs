//! CLI demo for the ct_tensor autodiff engine.
//!
//! Builds small graphs over random inputs, runs the backward pass, and
//! validates the stored gradients against finite differences.

use std::process::ExitCode;

use clap::Parser;
use ct_tensor::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ct", version, about = "Tensor autodiff demo and gradient checker")]
struct Args {
    /// Finite-difference step size
    #[arg(long, default_value_t = 1e-3)]
    eps: f32,

    /// Maximum absolute error accepted between autodiff and finite differences
    #[arg(long, default_value_t = 1e-2)]
    tolerance: f32,

    /// Seed for the random input tensors
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Log every backward visit
    #[arg(short, long)]
    verbose: bool,
}

/// A differentiable graph builder checked against finite differences.
struct Check {
    name: &'static str,
    shapes: &'static [&'static [usize]],
    build: fn(&[Tensor]) -> Result<Tensor>,
}

const CHECKS: &[Check] = &[
    Check {
        name: "sum(x * y + x)",
        shapes: &[&[2, 3], &[2, 3]],
        build: |v| v[0].mul(&v[1])?.add(&v[0]),
    },
    Check {
        name: "mean(x * 3)",
        shapes: &[&[4]],
        build: |v| v[0].mul_scalar(3.0)?.mean(),
    },
    Check {
        name: "sum(x + b), b broadcast",
        shapes: &[&[2, 2], &[]],
        build: |v| v[0].add(&v[1]),
    },
    Check {
        name: "sum((x * y) * (x * y))",
        shapes: &[&[3], &[3]],
        build: |v| {
            let xy = v[0].mul(&v[1])?;
            xy.mul(&xy)
        },
    },
    Check {
        name: "sum(softmax(x) * w)",
        shapes: &[&[2, 3], &[2, 3]],
        build: |v| v[0].softmax()?.mul(&v[1]),
    },
];

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<bool> {
    println!("=== Tensor Autodiff Demo ===\n");
    let mut rng = StdRng::seed_from_u64(args.seed);
    info!(seed = args.seed, eps = args.eps, tolerance = args.tolerance, "starting gradient checks");

    let mut all_passed = true;
    for check in CHECKS {
        let inputs: Vec<Tensor> = check
            .shapes
            .iter()
            .map(|dims| Tensor::rand(Shape::new(dims), true, &mut rng))
            .collect();
        let max_err = check_gradients(check, &inputs, args.eps)?;

        if max_err < args.tolerance {
            println!("PASS  {:<28} max error {:.2e}", check.name, max_err);
        } else {
            println!("FAIL  {:<28} max error {:.2e}", check.name, max_err);
            all_passed = false;
        }
    }

    println!("\n=== Additional Examples ===\n");
    diamond()?;
    matmul()?;
    argmax()?;
    traversal()?;

    if all_passed {
        println!("\nAll gradient checks passed (tolerance {:.2e})", args.tolerance);
    } else {
        println!("\nSome gradient checks failed (tolerance {:.2e})", args.tolerance);
    }
    Ok(all_passed)
}

/// Backward through `sum(build(inputs))` and compare every stored gradient
/// with its finite-difference estimate.
fn check_gradients(check: &Check, inputs: &[Tensor], eps: f32) -> Result<f32> {
    (check.build)(inputs)?.sum()?.backward(None)?;

    let numeric = finite_diff_grad(check.build, inputs, eps)?;
    let mut max_err = 0.0f32;
    for (input, expected) in inputs.iter().zip(&numeric) {
        let grad = input
            .grad()
            .ok_or(TensorError::Invariant("backward did not reach an input"))?;
        let err = max_grad_error(&grad.to_vec(), expected);
        debug!(check = check.name, shape = %input.shape(), err, "gradient compared");
        max_err = max_err.max(err);
    }
    Ok(max_err)
}

fn diamond() -> Result<()> {
    println!("1. Shared operand: z = sum(a * b + a * b)");
    let a = Tensor::from_vec(vec![1.0, 2.0], Shape::new(&[2]), true)?;
    let b = Tensor::from_vec(vec![3.0, 4.0], Shape::new(&[2]), false)?;
    let ab = a.mul(&b)?;
    let z = ab.add(&ab)?.sum()?;
    z.backward(None)?;
    println!("   z      = {}", z);
    let grad = a.grad().map_or_else(|| "None".to_string(), |g| g.to_string());
    println!("   a.grad = {} (expected: 2b)\n", grad);
    Ok(())
}

fn matmul() -> Result<()> {
    println!("2. Matrix product: (2, 3) @ (3, 2)");
    let a = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], Shape::new(&[2, 3]), false)?;
    let b = Tensor::from_vec(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], Shape::new(&[3, 2]), false)?;
    println!("   {}\n", a.matmul(&b)?);
    Ok(())
}

fn argmax() -> Result<()> {
    println!("3. Argmax along the last dim");
    let x = Tensor::from_vec(vec![0.1, 0.7, 0.2, 0.9, 0.05, 0.05], Shape::new(&[2, 3]), false)?;
    println!("   {} -> {:?}\n", x, x.argmax(-1)?);
    Ok(())
}

fn traversal() -> Result<()> {
    println!("4. Backward traversal order of mean(x * y + x)");
    let x = Tensor::ones(Shape::new(&[2]), true);
    let y = Tensor::full(Shape::new(&[2]), 2.0, true);
    let z = x.mul(&y)?.add(&x)?.mean()?;
    let mut order = Vec::new();
    let visits = z.backward_apply(|t| {
        order.push(t.grad_fn().map_or_else(|| "leaf".to_string(), |f| f.to_string()));
    });
    println!("   {} visits: {}", visits, order.join(" -> "));
    Ok(())
}
