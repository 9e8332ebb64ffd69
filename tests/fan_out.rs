mod common;

use common::{options, shared, y800};
use tensor_stream::decoders::synthetic_decoder::synthetic_luma;
use tensor_stream::{Converter, StreamError, StreamPool, SyntheticBackend};

const INPUTS: [&str; 3] = ["1.mp4", "2.mp4", "3.mp4"];

/// 每个读取器一个阻塞任务，共享同一个流池
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_share_one_pool_per_device() {
    let backend = SyntheticBackend::new();
    let pools: Vec<StreamPool> = (0..2).map(|_| StreamPool::new(shared(&backend))).collect();
    for (device_id, pool) in pools.iter().enumerate() {
        for input in INPUTS {
            pool.cache_stream_on(input, device_id as u32).unwrap();
        }
    }
    assert_eq!(backend.opened(), 6);

    let tasks: Vec<_> = (0..6u32)
        .map(|reader| {
            let device_id = reader % 2;
            let pool = pools[device_id as usize].clone();
            let backend = shared(&backend);
            tokio::task::spawn_blocking(move || -> Result<usize, StreamError> {
                let mut converter = Converter::new(INPUTS[0], options(device_id), backend);
                converter.add_stream_pool(&pool)?;
                converter.initialize(20)?;
                converter.enable_batch_optimization();

                let mut frames = 0;
                for _ in 0..5 {
                    for input in INPUTS {
                        converter.reset(input)?;
                        let result = converter.read_absolute(&[37, 2, 15], &y800())?;
                        assert_eq!(result.indices(), vec![37, 2, 15]);
                        for frame in result.iter() {
                            assert_eq!(
                                frame.data.as_u8().unwrap()[64 + 3],
                                synthetic_luma(frame.index, 3, 1)
                            );
                        }
                        frames += result.len();
                    }
                }
                converter.stop();
                Ok(frames)
            })
        })
        .collect();

    let counts = futures::future::try_join_all(tasks).await.unwrap();
    for count in counts {
        assert_eq!(count.unwrap(), 5 * 3 * 3);
    }

    // 没有读取器重新打开会话，所有绑定都已释放
    assert_eq!(backend.opened(), 6);
    for pool in &pools {
        for input in INPUTS {
            assert_eq!(pool.ref_count(input), Some(0));
        }
        pool.close().unwrap();
    }
    assert_eq!(backend.closed(), 6);
}
