use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mwtree::gaussian::GaussFunc;
use mwtree::mra::{BoundingBox, MultiResolutionAnalysis};
use mwtree::operators::ConvolutionOperator;
use mwtree::threads::ExecutionContext;
use mwtree::treebuilders::{apply_with, project_with};
use mwtree::trees::FunctionTree;

pub fn projection_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection");
    group.sample_size(20);

    let ctx = ExecutionContext::global().unwrap();
    let mra = MultiResolutionAnalysis::new(BoundingBox::<3>::symmetric(0, 1).unwrap(), 5).unwrap();
    let func = GaussFunc::new(1.0, 50.0, [0.1, 0.0, -0.1]).unwrap();

    for prec in [1e-3, 1e-4] {
        group.bench_function(format!("Projection of a 3D Gaussian to {prec:e}"), |b| {
            b.iter(|| {
                let mut tree = FunctionTree::new(&mra, "gaussian");
                black_box(project_with(&ctx, prec, &mut tree, &func, -1, false).unwrap());
                tree
            })
        });
    }
    group.finish();
}

pub fn poisson_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("poisson");
    group.sample_size(10);

    let ctx = ExecutionContext::global().unwrap();
    let prec = 1e-3;
    let mra = MultiResolutionAnalysis::new(BoundingBox::<3>::symmetric(0, 1).unwrap(), 5).unwrap();
    let func = GaussFunc::new(1.0, 20.0, [0.0; 3]).unwrap();
    let mut density = FunctionTree::new(&mra, "density");
    project_with(&ctx, prec, &mut density, &func, -1, false).unwrap();
    let oper = ConvolutionOperator::poisson(&mra, prec).unwrap();

    group.bench_function(
        format!("Poisson operator on {} nodes", density.n_nodes()),
        |b| {
            b.iter(|| {
                let mut out = FunctionTree::new(&mra, "potential");
                black_box(apply_with(&ctx, prec, &mut out, &oper, &density, -1, false).unwrap());
                out
            })
        },
    );
    group.finish();
}

criterion_group!(benches, projection_benchmark, poisson_benchmark);
criterion_main!(benches);
