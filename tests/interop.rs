use std::time::Duration;

use futures::future::join_all;
use tandem::runtime::{Error, ExecutorBuilder, Promise};

#[tokio::test]
async fn test_await_promise_from_tokio() {
    let executor = ExecutorBuilder::new().workers(2).build().unwrap();

    let value = executor
        .supply(|| {
            std::thread::sleep(Duration::from_millis(20));
            "ready"
        })
        .await
        .unwrap();

    assert_eq!(value, "ready");
}

#[tokio::test]
async fn test_await_many_promises() {
    let executor = ExecutorBuilder::new().workers(3).build().unwrap();

    let promises: Vec<_> = (1..=4).map(|i| executor.supply(move || i * 10)).collect();
    let results = join_all(promises).await;

    let values: Vec<i32> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(values, vec![10, 20, 30, 40]);
}

#[tokio::test]
async fn test_await_failed_promise() {
    let executor = ExecutorBuilder::new().workers(1).build().unwrap();
    executor.shutdown();

    let result = executor.supply(|| 1).await;

    assert!(matches!(result, Err(Error::ExecutorClosed)));
}

#[test]
fn test_block_on_channel() {
    let (resolver, promise) = Promise::channel();

    let settler = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(10));
        resolver.resolve(String::from("from another thread"));
    });

    let value = futures::executor::block_on(promise).unwrap();
    settler.join().unwrap();

    assert_eq!(value, "from another thread");
}
