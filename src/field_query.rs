use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use simple_error::{SimpleError, SimpleResult};

use crate::context::StimulationContext;
use crate::field_solver::PotentialMatrix;
use crate::points::Points;
use crate::process_group::{JobShare, ProcessGroup, Source, MASTER_RANK};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldQuery {
    pub requester_rank: usize,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    pub fiber_id: usize,
}

/// Potentials for the queried fiber, or the master's failure message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldResponse {
    pub v: Result<PotentialMatrix, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    Idle,
    MeshBuilt,
    Solved,
    Serving,
    Done,
    Failed,
}

/// Master side of the field query protocol. Drives the solver attached to
/// the master's context and answers worker queries until every fiber of the
/// completion mask has been served.
#[derive(Debug)]
pub struct FieldServer {
    state: ProtocolState,
    num_served: usize,
}

impl Default for FieldServer {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldServer {
    pub fn new() -> Self {
        Self {
            state: ProtocolState::Idle,
            num_served: 0,
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn num_served(&self) -> usize {
        self.num_served
    }

    fn expect_state(&self, expected: ProtocolState, action: &str) -> SimpleResult<()> {
        if self.state != expected {
            return Err(SimpleError::new(format!(
                "field server cannot {} while {:?}",
                action, self.state
            )));
        }
        Ok(())
    }

    fn transition(&mut self, state: ProtocolState) {
        debug!("field server {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn fail<G: ProcessGroup>(&mut self, group: &G, error: &SimpleError) {
        warn!("field server failed: {}", error);
        let response = FieldResponse {
            v: Err(error.as_str().to_string()),
        };

        for rank in (0..group.size()).filter(|rank| *rank != MASTER_RANK) {
            if let Err(send_error) = group.send(&response, rank) {
                debug!("rank {} not notified of the failure: {}", rank, send_error);
            }
        }
        self.transition(ProtocolState::Failed);
    }

    pub fn prepare(&mut self, context: &mut StimulationContext) -> SimpleResult<()> {
        self.expect_state(ProtocolState::Idle, "build the mesh")?;
        context.setup_solver()?;
        self.transition(ProtocolState::MeshBuilt);
        Ok(())
    }

    pub fn solve(&mut self, context: &mut StimulationContext) -> SimpleResult<()> {
        self.expect_state(ProtocolState::MeshBuilt, "solve")?;
        context.solve_field()?;
        info!("field solved, ready to serve queries");
        self.transition(ProtocolState::Solved);
        Ok(())
    }

    /// Answers queries from any rank, first come first served, until `mask`
    /// is all true. Returns the number of queries served. On failure every
    /// worker is sent the error before it is returned.
    pub fn serve<G: ProcessGroup>(
        &mut self,
        group: &mut G,
        context: &mut StimulationContext,
        mut mask: Vec<bool>,
    ) -> SimpleResult<usize> {
        self.expect_state(ProtocolState::Solved, "serve")?;
        self.transition(ProtocolState::Serving);

        while !mask.iter().all(|done| *done) {
            let (query, source) = group.recv::<FieldQuery>(Source::Any)?;
            debug!(
                "field query for fiber {} from rank {}",
                query.fiber_id, source
            );

            let fiber_id = query.fiber_id;
            let potentials = match mask.get_mut(fiber_id) {
                Some(done) => {
                    *done = true;
                    Points::new(query.x, query.y, query.z)
                        .and_then(|points| context.field_potentials(&points))
                }
                None => Err(SimpleError::new(format!(
                    "invalid fiber id in field query: {}",
                    fiber_id
                ))),
            };

            match potentials {
                Ok(v) => {
                    group.send(&FieldResponse { v: Ok(v) }, query.requester_rank)?;
                    self.num_served += 1;
                }
                Err(error) => {
                    self.fail(group, &error);
                    return Err(error);
                }
            }
        }

        info!("field server done after {} queries", self.num_served);
        self.transition(ProtocolState::Done);
        Ok(self.num_served)
    }
}

/// Worker side handle: potentials are obtained by a round trip to the master.
pub struct FieldProxy<'a, G: ProcessGroup> {
    group: &'a mut G,
}

impl<'a, G: ProcessGroup> FieldProxy<'a, G> {
    pub fn new(group: &'a mut G) -> Self {
        Self { group }
    }

    pub fn request(&mut self, points: &Points, fiber_id: usize) -> SimpleResult<PotentialMatrix> {
        let query = FieldQuery {
            requester_rank: self.group.rank(),
            x: points.x.clone(),
            y: points.y.clone(),
            z: points.z.clone(),
            fiber_id,
        };
        self.group.send(&query, MASTER_RANK)?;

        let (response, _) = self
            .group
            .recv::<FieldResponse>(Source::Rank(MASTER_RANK))?;
        response.v.map_err(|message| {
            SimpleError::new(format!(
                "field query for fiber {} failed on the master: {}",
                fiber_id, message
            ))
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PopulationOutcome<R> {
    /// Every fiber's result, ordered by fiber id. Only the master holds these.
    Gathered(Vec<(usize, R)>),
    /// Results were sent to the master.
    Delegated,
    Aborted,
}

/// Simulates every fiber of `fibers` across the group. Field-free contexts
/// are split over all ranks; finite element contexts are split over the
/// workers while the master serves potentials, unless the master is alone.
pub fn run_population<G, R, F>(
    group: &mut G,
    context: &mut StimulationContext,
    fibers: &[Points],
    field_solver_enabled: bool,
    mut simulate: F,
) -> SimpleResult<PopulationOutcome<R>>
where
    G: ProcessGroup,
    R: Serialize + DeserializeOwned,
    F: FnMut(usize, &mut StimulationContext) -> SimpleResult<R>,
{
    if context.needs_field_solver() && !field_solver_enabled {
        warn!(
            "rank {} aborts: fibers need a field solver and the field solver is disabled",
            group.rank()
        );
        return Ok(PopulationOutcome::Aborted);
    }

    let mut results = Vec::new();

    if !context.needs_field_solver() || group.is_alone() {
        let fiber_ids = group.split_job_from_arrays(fibers.len())?;
        for fiber_id in fiber_ids {
            context.compute_electrodes_footprints(&fibers[fiber_id], fiber_id)?;
            results.push((fiber_id, simulate(fiber_id, context)?));
        }
    } else if group.is_master() {
        if !context.has_solver() {
            return Err(SimpleError::new("master rank needs a field solver"));
        }

        let mut server = FieldServer::new();
        server.prepare(context)?;
        server.solve(context)?;

        group.send_synchronization_flag()?;
        match group.split_job_from_arrays_to_slaves(fibers.len())? {
            JobShare::CompletionMask(mask) => {
                server.serve(group, context, mask)?;
            }
            JobShare::Fibers(_) => {
                return Err(SimpleError::new("master rank received fibers to simulate"))
            }
        }
    } else {
        if context.has_solver() {
            return Err(SimpleError::new("only the master rank may own a field solver"));
        }

        group.send_synchronization_flag()?;
        let fiber_ids = match group.split_job_from_arrays_to_slaves(fibers.len())? {
            JobShare::Fibers(fiber_ids) => fiber_ids,
            JobShare::CompletionMask(_) => {
                return Err(SimpleError::new("worker rank received a completion mask"))
            }
        };

        for fiber_id in fiber_ids {
            let points = &fibers[fiber_id];
            let potentials = FieldProxy::new(&mut *group).request(points, fiber_id)?;
            context.assign_potentials(&potentials, fiber_id)?;
            results.push((fiber_id, simulate(fiber_id, context)?));
        }
    }

    match group.gather(results)? {
        Some(gathered) => {
            let mut all_results: Vec<(usize, R)> = gathered.into_iter().flatten().collect();
            all_results.sort_by_key(|(fiber_id, _)| *fiber_id);
            Ok(PopulationOutcome::Gathered(all_results))
        }
        None => Ok(PopulationOutcome::Delegated),
    }
}
