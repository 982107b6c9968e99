//! 有界重试
//!
//! 瞬时条件（忙、状态挂起）在本地重试有限次数后才上报。

/// 执行 `op`，对 `retryable` 认可的错误最多尝试 `max_attempts` 次。
///
/// `op` 收到从 0 开始的尝试序号。返回最后一次尝试的结果；
/// 不可重试的错误立即返回。
pub fn retry<T, E>(
    max_attempts: usize,
    mut retryable: impl FnMut(&E) -> bool,
    mut op: impl FnMut(usize) -> Result<T, E>,
) -> Result<T, E> {
    let mut attempt = 0;
    loop {
        match op(attempt) {
            Ok(v) => return Ok(v),
            Err(e) if attempt + 1 < max_attempts && retryable(&e) => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stops_on_success() {
        let mut calls = 0;
        let r: Result<u32, ()> = retry(5, |_| true, |n| {
            calls += 1;
            if n == 2 { Ok(7) } else { Err(()) }
        });
        assert_eq!(r, Ok(7));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_bounded_attempts() {
        let mut calls = 0;
        let r: Result<(), u8> = retry(5, |_| true, |_| {
            calls += 1;
            Err(1)
        });
        assert_eq!(r, Err(1));
        assert_eq!(calls, 5);
    }

    #[test]
    fn test_non_retryable_returns_immediately() {
        let mut calls = 0;
        let r: Result<(), u8> = retry(5, |e| *e == 1, |_| {
            calls += 1;
            Err(2)
        });
        assert_eq!(r, Err(2));
        assert_eq!(calls, 1);
    }
}
