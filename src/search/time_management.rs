use std::time::{Duration, Instant};

const MOVE_OVERHEAD_MS: u64 = 50;

#[derive(Debug, Clone)]
pub struct TimeManager {
    start_time: Instant,
    optimum_time: Duration,
    maximum_time: Duration,
    max_nodes: Option<u64>,
    infinite: bool,
}

impl TimeManager {
    pub fn infinite() -> Self {
        Self {
            start_time: Instant::now(),
            optimum_time: Duration::from_secs(3600 * 24),
            maximum_time: Duration::from_secs(3600 * 24),
            max_nodes: None,
            infinite: true,
        }
    }

    pub fn is_infinite(&self) -> bool {
        self.infinite
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        wtime: Option<u32>,
        btime: Option<u32>,
        movetime: Option<u32>,
        winc: Option<u32>,
        binc: Option<u32>,
        moves_to_go: Option<u32>,
        max_nodes: Option<u64>,
        infinite: bool,
        is_white_to_move: bool,
        ply: u32,
    ) -> Self {
        if infinite {
            return Self::infinite();
        }

        if let Some(mt) = movetime {
            let d = Duration::from_millis(mt.saturating_sub(MOVE_OVERHEAD_MS as u32) as u64);
            return Self {
                start_time: Instant::now(),
                optimum_time: d,
                maximum_time: d,
                max_nodes,
                infinite: false,
            };
        }

        let (optimum, maximum) = Self::allocate(
            wtime.map(u64::from),
            btime.map(u64::from),
            winc.map(u64::from),
            binc.map(u64::from),
            moves_to_go,
            is_white_to_move,
            ply,
        );

        Self {
            start_time: Instant::now(),
            optimum_time: optimum,
            maximum_time: maximum,
            max_nodes,
            infinite: false,
        }
    }

    fn allocate(
        wtime: Option<u64>,
        btime: Option<u64>,
        winc: Option<u64>,
        binc: Option<u64>,
        moves_to_go: Option<u32>,
        is_white_to_move: bool,
        ply: u32,
    ) -> (Duration, Duration) {
        let my_time = if is_white_to_move { wtime } else { btime };
        let my_inc = if is_white_to_move { winc } else { binc }.unwrap_or(0);

        let time_ms = match my_time {
            Some(t) => t,
            None => return (Duration::from_millis(1000), Duration::from_millis(5000)),
        };

        if time_ms < 500 {
            let opt = (time_ms / 4).max(10);
            return (Duration::from_millis(opt), Duration::from_millis(opt * 2));
        }

        let safe_time = time_ms.saturating_sub(MOVE_OVERHEAD_MS);

        // Assume the game lasts about 40 more moves from the opening, fewer
        // as it progresses.
        let moves_left = match moves_to_go {
            Some(mtg) => mtg.max(1) as u64,
            None => (40u64).saturating_sub(ply as u64 / 4).max(20),
        };

        let base = safe_time / moves_left + my_inc * 3 / 4;
        let optimum = base.min(safe_time / 2);
        let maximum = (base * 4).min(safe_time * 4 / 5);

        (
            Duration::from_millis(optimum.max(10)),
            Duration::from_millis(maximum.max(20)),
        )
    }

    #[inline(always)]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    // Hard limit, polled by the timer thread.
    pub fn out_of_time(&self) -> bool {
        if self.infinite {
            return false;
        }
        self.elapsed() >= self.maximum_time
    }

    // Soft limit, consulted between iterations: starting another iteration
    // only pays off when there is budget left for a good part of it.
    pub fn should_start_iteration(&self) -> bool {
        if self.infinite {
            return true;
        }
        self.elapsed() < self.optimum_time.mul_f32(0.6)
    }

    pub fn past_node_limit(&self, nodes: u64) -> bool {
        matches!(self.max_nodes, Some(limit) if nodes >= limit)
    }
}

impl Default for TimeManager {
    fn default() -> Self {
        Self::infinite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infinite_never_stops() {
        let tm = TimeManager::infinite();
        assert!(!tm.out_of_time());
        assert!(tm.should_start_iteration());
    }

    #[test]
    fn test_movetime_budget() {
        let tm = TimeManager::new(None, None, Some(60), None, None, None, None, false, true, 0);
        assert!(!tm.out_of_time());
        std::thread::sleep(Duration::from_millis(30));
        assert!(tm.out_of_time());
    }

    #[test]
    fn test_node_limit() {
        let tm =
            TimeManager::new(None, None, None, None, None, None, Some(1000), false, true, 0);
        assert!(!tm.past_node_limit(999));
        assert!(tm.past_node_limit(1000));
    }
}
