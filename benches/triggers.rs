//! Performance benchmarks for a3s-scheduler
//!
//! Run with: cargo bench

use a3s_scheduler::{
    job_fn, time_of_day, BoxError, CronTrigger, DailyTrigger, IntervalTrigger, Job, JobStore,
    MemoryJobStore, Trigger,
};
use chrono::{Duration, TimeZone, Weekday};
use chrono_tz::Asia::Kolkata;
use criterion::{criterion_group, criterion_main, Criterion};

fn bench_trigger_next_run(c: &mut Criterion) {
    let now = Kolkata.with_ymd_and_hms(2023, 6, 12, 11, 0, 0).unwrap();

    let interval = IntervalTrigger::new(30).unwrap();
    c.bench_function("IntervalTrigger::next_run_time", |b| {
        b.iter(|| interval.next_run_time(&now, &Kolkata));
    });

    let daily = DailyTrigger::at(10, 0, 0).unwrap();
    c.bench_function("DailyTrigger::next_run_time", |b| {
        b.iter(|| daily.next_run_time(&now, &Kolkata));
    });

    let cron = CronTrigger::new([Weekday::Sun], time_of_day(10, 0, 0).unwrap()).unwrap();
    c.bench_function("CronTrigger::next_run_time (worst case)", |b| {
        b.iter(|| cron.next_run_time(&now, &Kolkata));
    });
}

fn bench_due_jobs(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let now = Kolkata.with_ymd_and_hms(2023, 6, 12, 11, 0, 0).unwrap();

    let mut group = c.benchmark_group("due_jobs");
    for count in [10, 100, 1000] {
        // Half the jobs are due
        let store = rt.block_on(async {
            let store = MemoryJobStore::new();
            for i in 0..count {
                let offset = if i % 2 == 0 { -60 } else { 60 };
                let job = Job::new(
                    format!("job-{}", i),
                    IntervalTrigger::new(60).unwrap(),
                    job_fn(|| async { Ok::<(), BoxError>(()) }),
                )
                .with_next_run_time(now + Duration::seconds(offset));
                store.add(job).await.unwrap();
            }
            store
        });

        group.bench_function(format!("{} jobs", count), |b| {
            b.to_async(&rt)
                .iter(|| async { store.due_jobs(&now, Some(Duration::seconds(120))).await.unwrap() });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_trigger_next_run, bench_due_jobs);
criterion_main!(benches);
